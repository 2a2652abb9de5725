pub mod discovery;
pub mod process;
pub mod scrape;
pub mod send;
pub mod target;
pub mod transport;

use std::time::{
    SystemTime,
    UNIX_EPOCH,
};

pub use crate::process::ConversionResult;
pub use crate::scrape::ScrapeRawData;
pub use crate::target::{
    Target,
    TargetRegistry,
    TargetState,
};

pub(crate) fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests;
