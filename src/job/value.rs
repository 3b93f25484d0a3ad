//! # Argument and result values carried by jobs.
//!
//! [`JobValue`] is a closed, self-describing value type: everything a job
//! may carry as an argument, keyword argument, or result. Keeping the set
//! closed (rather than accepting arbitrary serde types) is what lets the
//! codec promise exact round-trips and deterministic encodings.
//!
//! Maps use [`BTreeMap`] so equal values always encode to equal bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A value that can travel through the job codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobValue {
    /// Absent / nil.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Ordered sequence.
    List(Vec<JobValue>),
    /// String-keyed map with deterministic (sorted) order.
    Map(BTreeMap<String, JobValue>),
}

impl JobValue {
    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            JobValue::Null => "null",
            JobValue::Bool(_) => "bool",
            JobValue::Int(_) => "int",
            JobValue::Float(_) => "float",
            JobValue::Str(_) => "str",
            JobValue::Bytes(_) => "bytes",
            JobValue::List(_) => "list",
            JobValue::Map(_) => "map",
        }
    }

    /// Returns the integer payload, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            JobValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the float payload, widening `Int` on the way.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            JobValue::Float(f) => Some(*f),
            JobValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Returns the string payload, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            JobValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JobValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// True for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, JobValue::Null)
    }
}

impl Default for JobValue {
    fn default() -> Self {
        JobValue::Null
    }
}

impl From<()> for JobValue {
    fn from(_: ()) -> Self {
        JobValue::Null
    }
}

impl From<bool> for JobValue {
    fn from(b: bool) -> Self {
        JobValue::Bool(b)
    }
}

impl From<i32> for JobValue {
    fn from(n: i32) -> Self {
        JobValue::Int(n as i64)
    }
}

impl From<i64> for JobValue {
    fn from(n: i64) -> Self {
        JobValue::Int(n)
    }
}

impl From<u32> for JobValue {
    fn from(n: u32) -> Self {
        JobValue::Int(n as i64)
    }
}

impl From<f64> for JobValue {
    fn from(f: f64) -> Self {
        JobValue::Float(f)
    }
}

impl From<&str> for JobValue {
    fn from(s: &str) -> Self {
        JobValue::Str(s.to_owned())
    }
}

impl From<String> for JobValue {
    fn from(s: String) -> Self {
        JobValue::Str(s)
    }
}

impl From<Vec<u8>> for JobValue {
    fn from(b: Vec<u8>) -> Self {
        JobValue::Bytes(b)
    }
}

impl From<Vec<JobValue>> for JobValue {
    fn from(v: Vec<JobValue>) -> Self {
        JobValue::List(v)
    }
}

impl From<BTreeMap<String, JobValue>> for JobValue {
    fn from(m: BTreeMap<String, JobValue>) -> Self {
        JobValue::Map(m)
    }
}

impl<T: Into<JobValue>> From<Option<T>> for JobValue {
    fn from(o: Option<T>) -> Self {
        match o {
            Some(v) => v.into(),
            None => JobValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_pick_the_right_variant() {
        assert_eq!(JobValue::from(3), JobValue::Int(3));
        assert_eq!(JobValue::from("x"), JobValue::Str("x".into()));
        assert_eq!(JobValue::from(()), JobValue::Null);
        assert_eq!(JobValue::from(Some(1i64)), JobValue::Int(1));
        assert_eq!(JobValue::from(None::<i64>), JobValue::Null);
    }

    #[test]
    fn accessors_reject_other_variants() {
        assert_eq!(JobValue::Int(5).as_int(), Some(5));
        assert_eq!(JobValue::Str("5".into()).as_int(), None);
        assert_eq!(JobValue::Int(5).as_float(), Some(5.0));
    }
}
