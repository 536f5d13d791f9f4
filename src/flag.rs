use log::warn;
use serde::{Deserialize, Deserializer};

use crate::eval::Error;
use crate::flag_value::{FlagType, FlagValue, FlagValueType};
use crate::rule::DynamicRule;

/// A named, typed configuration value with a static default and an ordered list of
/// [DynamicRule]s.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Flag {
    /// Internal id, used by dynamic rules to refer to this flag. Unlike override and identity
    /// ids it is required, since a flag without one could not be the target of a rule.
    pub id: String,
    pub key: String,
    #[serde(rename = "type")]
    pub flag_type: FlagType,
    /// The static default, served when no override or rule applies.
    pub value: FlagValue,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dynamic_rules: Vec<DynamicRule>,
}

/// A global override: supersedes a flag's default and its dynamic rules for every subject.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Override {
    #[serde(default)]
    pub id: String,
    pub key: String,
    pub value: FlagValue,
}

impl Flag {
    /// Returns `value` if it is of this flag's declared type.
    ///
    /// Values served for a flag come from several places (the default, identity and global
    /// overrides, rule results); all of them must agree with [Flag::flag_type]. A mismatch is a
    /// data integrity problem and is reported as [Error::MalformedFlag] rather than coerced.
    pub fn check_value<'a>(&self, value: &'a FlagValue) -> Result<&'a FlagValue, Error> {
        if value.flag_type().as_ref() == Some(&self.flag_type) {
            Ok(value)
        } else {
            warn!(
                "flag {} is declared {} but has value {:?}",
                self.key,
                self.flag_type,
                value
            );
            Err(Error::MalformedFlag)
        }
    }

    /// Reads the static default as `T`.
    pub fn default_value<T: FlagValueType>(&self) -> Result<T, Error> {
        if self.flag_type != T::FLAG_TYPE {
            return Err(Error::InvalidFlagType);
        }
        T::from_flag_value(&self.value).ok_or(Error::MalformedFlag)
    }

    #[cfg(test)]
    pub fn new(id: &str, key: &str, value: impl Into<FlagValue>) -> Self {
        let value = value.into();
        Self {
            id: id.to_string(),
            key: key.to_string(),
            flag_type: value.flag_type().unwrap_or(FlagType::String),
            value,
            dynamic_rules: vec![],
        }
    }
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
