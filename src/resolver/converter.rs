use super::param::ParamType;
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A raw string that could not be turned into the declared type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("expected {expected}, got '{value}'")]
    Invalid { expected: String, value: String },

    #[error("no converter registered for '{0}'")]
    NoConverter(String),

    #[error("body is not valid UTF-8")]
    NotUtf8,
}

/// Custom string-to-value converter
pub type Converter = Arc<dyn Fn(&str) -> Result<Value, ConversionError> + Send + Sync>;

/// String-to-[`Value`] conversion for every [`ParamType`].
///
/// Built-in types are always supported; `ParamType::Named` types need a converter
/// registered under the same name.
#[derive(Clone, Default)]
pub struct ConverterLookup {
    named: HashMap<&'static str, Converter>,
}

impl ConverterLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &'static str, converter: F)
    where
        F: Fn(&str) -> Result<Value, ConversionError> + Send + Sync + 'static,
    {
        self.named.insert(name, Arc::new(converter));
    }

    /// Whether values of `ty` can be converted (checked at startup)
    pub fn supports(&self, ty: &ParamType) -> bool {
        match ty {
            ParamType::Named(name) => self.named.contains_key(name),
            ParamType::List(inner) | ParamType::Optional(inner) => self.supports(inner),
            _ => true,
        }
    }

    /// Convert one raw value. Lists split the value on commas.
    pub fn convert(&self, ty: &ParamType, raw: &str) -> Result<Value, ConversionError> {
        match ty {
            ParamType::String => Ok(Value::String(raw.to_string())),
            ParamType::I64 => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid(ty, raw)),
            ParamType::U64 => raw
                .trim()
                .parse::<u64>()
                .map(Value::from)
                .map_err(|_| invalid(ty, raw)),
            ParamType::F64 => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid(ty, raw)),
            ParamType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
                _ => Err(invalid(ty, raw)),
            },
            ParamType::Json => serde_json::from_str(raw).or_else(|_| {
                // A bare word is accepted as a JSON string
                Ok::<Value, ConversionError>(Value::String(raw.to_string()))
            }),
            ParamType::Bytes => Ok(Value::Array(
                raw.as_bytes().iter().map(|b| Value::from(*b)).collect(),
            )),
            ParamType::List(inner) => {
                let values = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| self.convert(inner, s))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(values))
            }
            ParamType::Optional(inner) => self.convert(inner, raw),
            ParamType::Named(name) => match self.named.get(name) {
                Some(converter) => converter(raw),
                None => Err(ConversionError::NoConverter((*name).to_string())),
            },
        }
    }

    /// Convert repeated values (`?tag=a&tag=b`). Non-list types take the last value.
    pub fn convert_all(&self, ty: &ParamType, raw: &[&str]) -> Result<Value, ConversionError> {
        match ty.value_type() {
            ParamType::List(_) => {
                let mut out = Vec::with_capacity(raw.len());
                for value in raw {
                    match self.convert(ty.value_type(), value)? {
                        Value::Array(items) => out.extend(items),
                        other => out.push(other),
                    }
                }
                Ok(Value::Array(out))
            }
            other => match raw.last() {
                Some(last) => self.convert(other, last),
                None => Ok(Value::Null),
            },
        }
    }
}

impl fmt::Debug for ConverterLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&&str> = self.named.keys().collect();
        names.sort();
        f.debug_struct("ConverterLookup").field("named", &names).finish()
    }
}

fn invalid(ty: &ParamType, raw: &str) -> ConversionError {
    ConversionError::Invalid {
        expected: ty.to_string(),
        value: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        let c = ConverterLookup::new();
        assert_eq!(c.convert(&ParamType::I64, "-4").unwrap(), json!(-4));
        assert_eq!(c.convert(&ParamType::U64, "42").unwrap(), json!(42));
        assert_eq!(c.convert(&ParamType::F64, "1.5").unwrap(), json!(1.5));
        assert_eq!(c.convert(&ParamType::Bool, "Yes").unwrap(), json!(true));
        assert_eq!(c.convert(&ParamType::String, "x").unwrap(), json!("x"));
        assert!(matches!(
            c.convert(&ParamType::U64, "-1"),
            Err(ConversionError::Invalid { .. })
        ));
    }

    #[test]
    fn test_json_and_lists() {
        let c = ConverterLookup::new();
        assert_eq!(c.convert(&ParamType::Json, r#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert_eq!(c.convert(&ParamType::Json, "plain").unwrap(), json!("plain"));
        let list = ParamType::list(ParamType::I64);
        assert_eq!(c.convert(&list, "1, 2,3").unwrap(), json!([1, 2, 3]));
        assert_eq!(c.convert_all(&list, &["1,2", "3"]).unwrap(), json!([1, 2, 3]));
        assert_eq!(c.convert_all(&ParamType::I64, &["1", "2"]).unwrap(), json!(2));
    }

    #[test]
    fn test_named_converter() {
        let mut c = ConverterLookup::new();
        let money = ParamType::Named("Money");
        assert!(!c.supports(&money));
        assert!(matches!(
            c.convert(&money, "3.10"),
            Err(ConversionError::NoConverter(_))
        ));
        c.register("Money", |raw| {
            let cents = raw
                .replace('.', "")
                .parse::<i64>()
                .map_err(|_| ConversionError::Invalid {
                    expected: "Money".into(),
                    value: raw.into(),
                })?;
            Ok(json!({ "cents": cents }))
        });
        assert!(c.supports(&ParamType::optional(money.clone())));
        assert_eq!(c.convert(&money, "3.10").unwrap(), json!({"cents": 310}));
    }
}
