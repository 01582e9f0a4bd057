//! Cache key parameters.
//!
//! Operations and loaders declare the parameters that change what they
//! produce. Each parameter becomes one `key=value` path fragment, in key
//! order, so the same parameters always yield the same directory no matter
//! in which order they were declared.
//!
//! Values are serialized with their plain string form. Two different values
//! with the same string form collide; there is no hashing step.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use crate::errors::{GeodataError, Result};

/// A single key parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ParamValue>),
}

impl Display for ParamValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            // `{:?}` keeps the decimal point: `1.0`, not `1`
            ParamValue::Float(v) => write!(f, "{v:?}"),
            ParamValue::Text(v) => f.write_str(v),
            ParamValue::List(values) => {
                f.write_str("[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for ParamValue {
                fn from(v: $t) -> Self {
                    ParamValue::Int(v as i64)
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32, usize);

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Float(v as f64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        ParamValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// Sorted mapping of key parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyParams {
    params: BTreeMap<String, ParamValue>,
}

impl KeyParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, replacing any previous value under `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add a parameter only when `value` is set.
    pub fn insert_opt<V: Into<ParamValue>>(
        &mut self,
        key: impl Into<String>,
        value: Option<V>,
    ) -> &mut Self {
        if let Some(value) = value {
            self.insert(key, value);
        }
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Iterate in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge `other` into `self`. A key present in both is a configuration
    /// error: the two sources would silently shadow each other in the cache
    /// key.
    pub fn merge(&mut self, other: &KeyParams) -> Result<()> {
        for (key, value) in other.iter() {
            if self.params.contains_key(key) {
                return Err(GeodataError::Configuration(format!(
                    "Key parameter '{key}' is declared twice"
                )));
            }
            self.params.insert(key.to_string(), value.clone());
        }
        Ok(())
    }

    /// Check every key can be used as a path fragment.
    pub fn validate(&self) -> Result<()> {
        for key in self.params.keys() {
            if key.is_empty() || key.contains(['=', '/', '\\']) || key.starts_with('.') {
                return Err(GeodataError::Configuration(format!(
                    "Invalid key parameter name '{key}'"
                )));
            }
        }
        Ok(())
    }

    /// `key=value` path fragments in key order. Path separators inside
    /// values are replaced by `_`.
    pub fn fragments(&self) -> Result<Vec<String>> {
        self.validate()?;
        Ok(self
            .params
            .iter()
            .map(|(k, v)| {
                let value: String = v
                    .to_string()
                    .chars()
                    .map(|c| if c == '/' || c == '\\' { '_' } else { c })
                    .collect();
                format!("{k}={value}")
            })
            .collect())
    }
}

impl Display for KeyParams {
    /// `k1=v1, k2=v2` in key order.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match v {
                ParamValue::Text(text) => write!(f, "{k}={text:?}")?,
                v => write!(f, "{k}={v}")?,
            }
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for KeyParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = KeyParams::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_are_sorted() {
        let params: KeyParams = [("time", ParamValue::from(10)), ("resolution", 5.into())]
            .into_iter()
            .collect();
        assert_eq!(
            params.fragments().unwrap(),
            vec!["resolution=5".to_string(), "time=10".to_string()]
        );
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a = KeyParams::new().with("b", 1).with("a", "x");
        let b = KeyParams::new().with("a", "x").with("b", 1);
        assert_eq!(a.fragments().unwrap(), b.fragments().unwrap());
    }

    #[test]
    fn empty_params_have_no_fragments() {
        assert!(KeyParams::new().fragments().unwrap().is_empty());
    }

    #[test]
    fn value_forms() {
        assert_eq!(ParamValue::from(1.0).to_string(), "1.0");
        assert_eq!(ParamValue::from(0.25f32).to_string(), "0.25");
        assert_eq!(ParamValue::from(true).to_string(), "true");
        assert_eq!(ParamValue::from(vec![1, 2]).to_string(), "[1, 2]");
        assert_eq!(ParamValue::from("a/b").to_string(), "a/b");
    }

    #[test]
    fn separators_in_values_are_escaped() {
        let params = KeyParams::new().with("src", "data/wtd.tif");
        assert_eq!(params.fragments().unwrap(), vec!["src=data_wtd.tif"]);
    }

    #[test]
    fn invalid_keys_rejected() {
        for key in ["", "a=b", "a/b", ".hidden"] {
            let params = KeyParams::new().with(key, 1);
            assert!(matches!(
                params.fragments(),
                Err(GeodataError::Configuration(_))
            ));
        }
    }

    #[test]
    fn merge_rejects_duplicates() {
        let mut a = KeyParams::new().with("x", 1);
        a.merge(&KeyParams::new().with("y", 2)).unwrap();
        assert_eq!(a.len(), 2);
        assert!(a.merge(&KeyParams::new().with("x", 3)).is_err());
    }

    #[test]
    fn display_sorted() {
        let params = KeyParams::new().with("time", 10).with("resolution", 5);
        assert_eq!(params.to_string(), "resolution=5, time=10");
        let params = KeyParams::new().with("name", "abc");
        assert_eq!(params.to_string(), "name=\"abc\"");
    }
}
