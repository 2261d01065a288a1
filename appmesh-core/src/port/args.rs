//! Argument helpers for command handlers.
//!
//! Clients built on string maps send every value as a string, so numeric
//! parameters accept either a JSON number or a string holding one.
//!
//! ```ignore
//! #[derive(Deserialize)]
//! struct TypeText {
//!     text: String,
//!     #[serde(default, deserialize_with = "args::opt_number")]
//!     delay_us: Option<u64>,
//! }
//! ```

use std::fmt::Display;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient<T> {
    Number(T),
    Text(String),
}

impl<T> Lenient<T>
where
    T: FromStr,
    T::Err: Display,
{
    fn into_value<E: de::Error>(self) -> Result<T, E> {
        match self {
            Lenient::Number(n) => Ok(n),
            Lenient::Text(s) => s
                .trim()
                .parse()
                .map_err(|e| E::custom(format!("expected a number, got '{s}': {e}"))),
        }
    }
}

pub fn number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    Lenient::<T>::deserialize(deserializer)?.into_value()
}

/// Like [`number`]; `null` maps to `None`.
pub fn opt_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match Option::<Lenient<T>>::deserialize(deserializer)? {
        Some(raw) => raw.into_value().map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Args {
        #[serde(default, deserialize_with = "opt_number")]
        delay_us: Option<u64>,
        #[serde(default, deserialize_with = "number")]
        timeout: i32,
    }

    #[test]
    fn test_accepts_numbers_and_numeric_strings() {
        let a: Args = serde_json::from_value(json!({ "delay_us": 250, "timeout": "-1" })).unwrap();
        assert_eq!(a.delay_us, Some(250));
        assert_eq!(a.timeout, -1);

        let b: Args = serde_json::from_value(json!({ "delay_us": " 40 " })).unwrap();
        assert_eq!(b.delay_us, Some(40));
        assert_eq!(b.timeout, 0);
    }

    #[test]
    fn test_missing_and_null_are_none() {
        let a: Args = serde_json::from_value(json!({})).unwrap();
        assert_eq!(a.delay_us, None);
        let b: Args = serde_json::from_value(json!({ "delay_us": null })).unwrap();
        assert_eq!(b.delay_us, None);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(serde_json::from_value::<Args>(json!({ "delay_us": "soon" })).is_err());
        assert!(serde_json::from_value::<Args>(json!({ "delay_us": -5 })).is_err());
    }
}
