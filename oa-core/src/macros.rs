#[macro_export]
macro_rules! klabel {
    ($($key:tt => $val:expr),+$(,)?) => {
        Some(std::collections::BTreeMap::from([$(($key.to_string(), $val.to_string())),+]))
    };
}

pub use klabel;
