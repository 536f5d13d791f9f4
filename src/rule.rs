use log::warn;
use serde::Deserialize;

use crate::eval::Error;
use crate::flag_value::FlagValue;

/// A conditional override: if the flag referenced by [DynamicRule::expression] resolves to a value
/// that satisfies the expression, the owning flag serves [DynamicRule::value].
///
/// The result value is typed by the owning flag's type, not the referenced flag's type.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DynamicRule {
    pub expression: Expression,
    pub value: FlagValue,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Expression {
    /// Internal id of the flag whose resolved value is compared.
    pub flag_id: String,
    pub op: Op,
    /// Right-hand operand, typed by the referenced flag's type.
    pub value: FlagValue,
}

/// Comparison operators usable in an [Expression].
///
/// Booleans support only equality; numbers and strings support the full relational set. Symbols
/// the engine does not know are kept as [Op::Unknown] so a single bad rule does not prevent the
/// rest of the flag data from loading.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(from = "String")]
pub enum Op {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Unknown(String),
}

impl From<String> for Op {
    fn from(symbol: String) -> Self {
        match symbol.as_str() {
            "==" => Op::Equal,
            "!=" => Op::NotEqual,
            "<" => Op::LessThan,
            "<=" => Op::LessThanOrEqual,
            ">" => Op::GreaterThan,
            ">=" => Op::GreaterThanOrEqual,
            _ => Op::Unknown(symbol),
        }
    }
}

impl From<&str> for Op {
    fn from(symbol: &str) -> Self {
        Op::from(symbol.to_string())
    }
}

impl Op {
    pub fn symbol(&self) -> &str {
        match self {
            Op::Equal => "==",
            Op::NotEqual => "!=",
            Op::LessThan => "<",
            Op::LessThanOrEqual => "<=",
            Op::GreaterThan => ">",
            Op::GreaterThanOrEqual => ">=",
            Op::Unknown(symbol) => symbol,
        }
    }

    /// Compare `lhs` (the referenced flag's resolved value) against `rhs` (the rule's comparison
    /// value).
    ///
    /// Both operands must be of the same flag type and the operator must be defined for that type,
    /// otherwise the rule is malformed.
    pub fn matches(&self, lhs: &FlagValue, rhs: &FlagValue) -> Result<bool, Error> {
        match (lhs, rhs) {
            (FlagValue::Bool(l), FlagValue::Bool(r)) => self.bool_op(*l, *r),
            (FlagValue::Number(l), FlagValue::Number(r)) => self.ordered_op(l, r),
            (FlagValue::Str(l), FlagValue::Str(r)) => self.ordered_op(l.as_str(), r.as_str()),
            _ => {
                warn!(
                    "cannot compare {:?} {} {:?}: operand types differ",
                    lhs,
                    self.symbol(),
                    rhs
                );
                Err(Error::MalformedFlag)
            }
        }
    }

    fn bool_op(&self, lhs: bool, rhs: bool) -> Result<bool, Error> {
        match self {
            Op::Equal => Ok(lhs == rhs),
            Op::NotEqual => Ok(lhs != rhs),
            _ => {
                warn!("operator '{}' is not defined for booleans", self.symbol());
                Err(Error::MalformedFlag)
            }
        }
    }

    fn ordered_op<T: PartialOrd + ?Sized>(&self, lhs: &T, rhs: &T) -> Result<bool, Error> {
        match self {
            Op::Equal => Ok(lhs == rhs),
            Op::NotEqual => Ok(lhs != rhs),
            Op::LessThan => Ok(lhs < rhs),
            Op::LessThanOrEqual => Ok(lhs <= rhs),
            Op::GreaterThan => Ok(lhs > rhs),
            Op::GreaterThanOrEqual => Ok(lhs >= rhs),
            Op::Unknown(symbol) => {
                warn!("unknown operator '{}'", symbol);
                Err(Error::MalformedFlag)
            }
        }
    }
}
