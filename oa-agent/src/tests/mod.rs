
use oa_testutils::*;

use super::*;
