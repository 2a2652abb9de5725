mod cache_test;
mod selector_test;

use oa_testutils::*;

use super::*;
use crate::prelude::*;
