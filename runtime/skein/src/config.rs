use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A typed configuration value from the node option DSL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    BoolArray(Vec<bool>),
    StrArray(Vec<String>),
}

impl ConfigValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Int(_) => "INT",
            ConfigValue::Float(_) => "FLOAT",
            ConfigValue::Bool(_) => "BOOL",
            ConfigValue::Str(_) => "STRING",
            ConfigValue::IntArray(_) => "INT_ARRAY",
            ConfigValue::FloatArray(_) => "FLOAT_ARRAY",
            ConfigValue::BoolArray(_) => "BOOL_ARRAY",
            ConfigValue::StrArray(_) => "STRING_ARRAY",
        }
    }
}

/// Parsed node configuration.
///
/// The wire form is `key=(TYPE)value[;key=(TYPE)value]*` where TYPE is one of
/// `INT, FLOAT, BOOL, STRING, INT_ARRAY, FLOAT_ARRAY, BOOL_ARRAY,
/// STRING_ARRAY`. Array values are wrapped in `[...]`, comma separated, e.g.
/// `threshold=(FLOAT_ARRAY)[0.2,0.584];mode=(STRING)detection`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigMap {
    entries: BTreeMap<String, ConfigValue>,
}

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(config: &str) -> Result<Self> {
        let mut map = ConfigMap::new();
        for pair in config.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, val) = parse_key_val(pair)?;
            map.entries.insert(key, val);
        }
        Ok(map)
    }

    pub fn set(&mut self, key: &str, value: ConfigValue) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn require(&self, key: &str) -> Result<&ConfigValue> {
        self.entries
            .get(key)
            .ok_or_else(|| Error::MissingKey(key.to_string()))
    }

    fn bad_type(key: &str, expected: &'static str, actual: &ConfigValue) -> Error {
        Error::BadType {
            key: key.to_string(),
            expected,
            actual: actual.type_name(),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        match self.require(key)? {
            ConfigValue::Int(v) => Ok(*v),
            other => Err(Self::bad_type(key, "INT", other)),
        }
    }

    pub fn get_float(&self, key: &str) -> Result<f64> {
        match self.require(key)? {
            ConfigValue::Float(v) => Ok(*v),
            ConfigValue::Int(v) => Ok(*v as f64),
            other => Err(Self::bad_type(key, "FLOAT", other)),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.require(key)? {
            ConfigValue::Bool(v) => Ok(*v),
            other => Err(Self::bad_type(key, "BOOL", other)),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        match self.require(key)? {
            ConfigValue::Str(v) => Ok(v),
            other => Err(Self::bad_type(key, "STRING", other)),
        }
    }

    pub fn get_int_array(&self, key: &str) -> Result<&[i64]> {
        match self.require(key)? {
            ConfigValue::IntArray(v) => Ok(v),
            other => Err(Self::bad_type(key, "INT_ARRAY", other)),
        }
    }

    pub fn get_float_array(&self, key: &str) -> Result<&[f64]> {
        match self.require(key)? {
            ConfigValue::FloatArray(v) => Ok(v),
            other => Err(Self::bad_type(key, "FLOAT_ARRAY", other)),
        }
    }

    pub fn get_bool_array(&self, key: &str) -> Result<&[bool]> {
        match self.require(key)? {
            ConfigValue::BoolArray(v) => Ok(v),
            other => Err(Self::bad_type(key, "BOOL_ARRAY", other)),
        }
    }

    pub fn get_str_array(&self, key: &str) -> Result<&[String]> {
        match self.require(key)? {
            ConfigValue::StrArray(v) => Ok(v),
            other => Err(Self::bad_type(key, "STRING_ARRAY", other)),
        }
    }

    /// Like [`ConfigMap::get_int`] but absence is not an error.
    pub fn opt_int(&self, key: &str) -> Result<Option<i64>> {
        if self.contains(key) {
            self.get_int(key).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn opt_float(&self, key: &str) -> Result<Option<f64>> {
        if self.contains(key) {
            self.get_float(key).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn opt_bool(&self, key: &str) -> Result<Option<bool>> {
        if self.contains(key) {
            self.get_bool(key).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn opt_str(&self, key: &str) -> Result<Option<&str>> {
        if self.contains(key) {
            self.get_str(key).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Render back to the wire form. Keys are emitted in sorted order so the
    /// output is deterministic.
    pub fn to_config_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.entries.len());
        for (key, val) in &self.entries {
            parts.push(format!("{}=({}){}", key, val.type_name(), render_value(val)));
        }
        parts.join(";")
    }
}

fn render_value(val: &ConfigValue) -> String {
    fn join<T: ToString>(items: &[T]) -> String {
        let strs: Vec<String> = items.iter().map(|v| v.to_string()).collect();
        format!("[{}]", strs.join(","))
    }
    match val {
        ConfigValue::Int(v) => v.to_string(),
        ConfigValue::Float(v) => v.to_string(),
        ConfigValue::Bool(v) => v.to_string(),
        ConfigValue::Str(v) => v.clone(),
        ConfigValue::IntArray(v) => join(v),
        ConfigValue::FloatArray(v) => join(v),
        ConfigValue::BoolArray(v) => join(v),
        ConfigValue::StrArray(v) => join(v),
    }
}

fn parse_key_val(pair: &str) -> Result<(String, ConfigValue)> {
    let invalid = || Error::InvalidConfigString(pair.to_string());

    let eq = pair.find('=').ok_or_else(invalid)?;
    let key = pair[..eq].trim();
    if key.is_empty() {
        return Err(invalid());
    }
    let rest = pair[eq + 1..].trim_start();
    if !rest.starts_with('(') {
        return Err(invalid());
    }
    let close = rest.find(')').ok_or_else(invalid)?;
    let type_name = &rest[1..close];
    let value = rest[close + 1..].trim();

    let parsed = match type_name {
        "INT" => ConfigValue::Int(value.parse().map_err(|_| invalid())?),
        "FLOAT" => ConfigValue::Float(value.parse().map_err(|_| invalid())?),
        "BOOL" => ConfigValue::Bool(parse_bool(value).ok_or_else(invalid)?),
        "STRING" => ConfigValue::Str(value.to_string()),
        "INT_ARRAY" => ConfigValue::IntArray(parse_array(value, |s| s.parse().ok()).ok_or_else(invalid)?),
        "FLOAT_ARRAY" => {
            ConfigValue::FloatArray(parse_array(value, |s| s.parse().ok()).ok_or_else(invalid)?)
        }
        "BOOL_ARRAY" => ConfigValue::BoolArray(parse_array(value, parse_bool).ok_or_else(invalid)?),
        "STRING_ARRAY" => {
            ConfigValue::StrArray(parse_array(value, |s| Some(s.to_string())).ok_or_else(invalid)?)
        }
        _ => return Err(invalid()),
    };
    Ok((key.to_string(), parsed))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" | "True" | "1" => Some(true),
        "false" | "False" | "0" => Some(false),
        _ => None,
    }
}

fn parse_array<T>(value: &str, item: impl Fn(&str) -> Option<T>) -> Option<Vec<T>> {
    let inner = value.strip_prefix('[')?.strip_suffix(']')?;
    let inner = inner.trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }
    inner.split(',').map(|s| item(s.trim())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalars_and_arrays() {
        let cfg =
            ConfigMap::parse("threshold=(FLOAT_ARRAY)[0.2,0.584];mode=(STRING)detection;n=(INT)4")
                .unwrap();
        assert_eq!(cfg.get_float_array("threshold").unwrap(), &[0.2, 0.584]);
        assert_eq!(cfg.get_str("mode").unwrap(), "detection");
        assert_eq!(cfg.get_int("n").unwrap(), 4);
    }

    #[test]
    fn missing_key_named_in_error() {
        let cfg = ConfigMap::parse("a=(INT)1").unwrap();
        match cfg.get_int("streamNum") {
            Err(Error::MissingKey(k)) => assert_eq!(k, "streamNum"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn type_mismatch_is_reported() {
        let cfg = ConfigMap::parse("a=(STRING)x").unwrap();
        assert!(matches!(cfg.get_int("a"), Err(Error::BadType { .. })));
    }

    #[test]
    fn rejects_malformed_pairs() {
        assert!(ConfigMap::parse("novalue").is_err());
        assert!(ConfigMap::parse("k=(WAT)1").is_err());
        assert!(ConfigMap::parse("k=(INT)notanumber").is_err());
        assert!(ConfigMap::parse("k=(INT_ARRAY)1,2").is_err());
    }

    #[test]
    fn roundtrips_via_config_string() {
        let src = "b=(BOOL)true;f=(FLOAT)1.5;ids=(INT_ARRAY)[1,2,3];mode=(STRING)x";
        let cfg = ConfigMap::parse(src).unwrap();
        let again = ConfigMap::parse(&cfg.to_config_string()).unwrap();
        assert_eq!(cfg, again);
    }

    #[test]
    fn empty_and_trailing_semicolons() {
        assert!(ConfigMap::parse("").unwrap().is_empty());
        let cfg = ConfigMap::parse("a=(INT)1;").unwrap();
        assert_eq!(cfg.get_int("a").unwrap(), 1);
    }
}
