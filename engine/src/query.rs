//! Query predicates over record fields.
//!
//! Predicates are plain serializable values. The same tree filters the local
//! store and travels to the remote pull endpoint as JSON:
//!
//! ```rust
//! use ferry_engine::Predicate;
//!
//! let open = Predicate::eq("complete", false);
//! let json = serde_json::to_string(&open).unwrap();
//! assert_eq!(json, r#"{"op":"eq","field":"complete","value":false}"#);
//! ```

use crate::record::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// A filter over record fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Predicate {
    /// Matches every record
    #[default]
    All,
    Eq {
        field: String,
        value: Value,
    },
    Ne {
        field: String,
        value: Value,
    },
    Gt {
        field: String,
        value: Value,
    },
    Gte {
        field: String,
        value: Value,
    },
    Lt {
        field: String,
        value: Value,
    },
    Lte {
        field: String,
        value: Value,
    },
    /// Field is present and not null
    Exists {
        field: String,
    },
    And {
        all: Vec<Predicate>,
    },
    Or {
        any: Vec<Predicate>,
    },
    Not {
        not: Box<Predicate>,
    },
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Gte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Lte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Predicate::Exists {
            field: field.into(),
        }
    }

    /// Both this and `other` must match.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::All => other,
            Predicate::And { mut all } => {
                all.push(other);
                Predicate::And { all }
            }
            this => Predicate::And {
                all: vec![this, other],
            },
        }
    }

    /// Either this or `other` must match.
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or { mut any } => {
                any.push(other);
                Predicate::Or { any }
            }
            this => Predicate::Or {
                any: vec![this, other],
            },
        }
    }

    /// Inverts this predicate.
    pub fn negate(self) -> Self {
        Predicate::Not {
            not: Box::new(self),
        }
    }

    /// Evaluate against a record's fields.
    ///
    /// A missing field reads as null. Numbers compare numerically and strings
    /// lexicographically; ordering across types never matches.
    pub fn matches(&self, fields: &Fields) -> bool {
        let lookup = |field: &str| fields.get(field).unwrap_or(&Value::Null);
        match self {
            Predicate::All => true,
            Predicate::Eq { field, value } => values_equal(lookup(field), value),
            Predicate::Ne { field, value } => !values_equal(lookup(field), value),
            Predicate::Gt { field, value } => {
                compare(lookup(field), value) == Some(Ordering::Greater)
            }
            Predicate::Gte { field, value } => matches!(
                compare(lookup(field), value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Predicate::Lt { field, value } => compare(lookup(field), value) == Some(Ordering::Less),
            Predicate::Lte { field, value } => matches!(
                compare(lookup(field), value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Predicate::Exists { field } => !lookup(field).is_null(),
            Predicate::And { all } => all.iter().all(|p| p.matches(fields)),
            Predicate::Or { any } => any.iter().any(|p| p.matches(fields)),
            Predicate::Not { not } => !not.matches(fields),
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => compare(left, right) == Some(Ordering::Equal),
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => {
            if let (Some(l), Some(r)) = (l.as_i64(), r.as_i64()) {
                return Some(l.cmp(&r));
            }
            l.as_f64()?.partial_cmp(&r.as_f64()?)
        }
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}
