use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

/// The declared type of a [crate::Flag]. Every value served for a flag must be of this type.
///
/// Type names this crate does not know load as [FlagType::Unknown]. Such a flag is never served:
/// reading it through a typed entry point fails with [crate::Error::InvalidFlagType] and rules
/// that compare against it fail with [crate::Error::MalformedFlag].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum FlagType {
    Boolean,
    Number,
    String,
    Unknown(String),
}

impl FlagType {
    pub fn name(&self) -> &str {
        match self {
            FlagType::Boolean => "boolean",
            FlagType::Number => "number",
            FlagType::String => "string",
            FlagType::Unknown(name) => name.as_str(),
        }
    }
}

impl From<&str> for FlagType {
    fn from(name: &str) -> Self {
        match name {
            "boolean" => FlagType::Boolean,
            "number" => FlagType::Number,
            "string" => FlagType::String,
            other => FlagType::Unknown(other.to_string()),
        }
    }
}

impl From<String> for FlagType {
    fn from(name: String) -> Self {
        FlagType::from(name.as_str())
    }
}

impl From<FlagType> for String {
    fn from(flag_type: FlagType) -> Self {
        flag_type.name().to_string()
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Number(f64),
    Str(String),
    Json(serde_json::Value),
}

impl From<bool> for FlagValue {
    fn from(b: bool) -> FlagValue {
        FlagValue::Bool(b)
    }
}

impl From<f64> for FlagValue {
    fn from(f: f64) -> FlagValue {
        FlagValue::Number(f)
    }
}

impl From<String> for FlagValue {
    fn from(s: String) -> FlagValue {
        FlagValue::Str(s)
    }
}

impl From<&str> for FlagValue {
    fn from(s: &str) -> FlagValue {
        FlagValue::Str(s.to_string())
    }
}

impl From<serde_json::Value> for FlagValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Bool(b) => b.into(),
            Value::Number(n) => match n.as_f64() {
                Some(f) => f.into(),
                None => FlagValue::Json(Value::Number(n)),
            },
            Value::String(s) => s.into(),
            Value::Null | Value::Object(_) | Value::Array(_) => FlagValue::Json(v),
        }
    }
}

impl FlagValue {
    /// The [FlagType] this value belongs to, or None for values that are not a valid flag type.
    pub fn flag_type(&self) -> Option<FlagType> {
        match self {
            FlagValue::Bool(_) => Some(FlagType::Boolean),
            FlagValue::Number(_) => Some(FlagType::Number),
            FlagValue::Str(_) => Some(FlagType::String),
            FlagValue::Json(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => {
                warn!("flag value is not bool but {:?}", self);
                None
            }
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FlagValue::Number(f) => Some(*f),
            _ => {
                warn!("flag value is not number but {:?}", self);
                None
            }
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            FlagValue::Str(s) => Some(s.clone()),
            _ => {
                warn!("flag value is not str but {:?}", self);
                None
            }
        }
    }
}

/// A Rust type that a flag can be read as.
///
/// Implemented for `bool`, `f64` and `String`, one per [FlagType]. The typed evaluation entry
/// points on [crate::Client] are all expressed through this trait.
pub trait FlagValueType: Sized + Default {
    /// The flag type this Rust type reads.
    const FLAG_TYPE: FlagType;

    /// Read `value` as this type. Returns None if the value has a different kind.
    fn from_flag_value(value: &FlagValue) -> Option<Self>;
}

impl FlagValueType for bool {
    const FLAG_TYPE: FlagType = FlagType::Boolean;

    fn from_flag_value(value: &FlagValue) -> Option<Self> {
        value.as_bool()
    }
}

impl FlagValueType for f64 {
    const FLAG_TYPE: FlagType = FlagType::Number;

    fn from_flag_value(value: &FlagValue) -> Option<Self> {
        value.as_number()
    }
}

impl FlagValueType for String {
    const FLAG_TYPE: FlagType = FlagType::String;

    fn from_flag_value(value: &FlagValue) -> Option<Self> {
        value.as_string()
    }
}
