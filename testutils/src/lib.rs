mod cache;
mod configs;
mod fake;
mod objs;

pub use cache::*;
pub use configs::*;
pub use fake::*;
pub use objs::*;
pub use rstest::fixture;
pub use rstest_log::rstest;
