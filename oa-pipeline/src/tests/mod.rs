mod resolver_test;
mod sender_test;
mod transport_test;

use oa_core::prelude::*;
use oa_testutils::*;

use super::*;
use crate::transport::mock::MockTransport;
use crate::transport::SecurityMaster;

pub(crate) const TEST_PCODE: i64 = 7011;
pub(crate) const TEST_OID: i32 = 1301;

pub(crate) fn test_security_master() -> SecurityMaster {
    SecurityMaster { pcode: TEST_PCODE, oid: TEST_OID }
}
