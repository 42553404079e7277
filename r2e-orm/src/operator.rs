//! Dialect-agnostic predicate trees.
//!
//! ```ignore
//! use r2e_orm::operator::{and, eq, gt};
//!
//! let cond = and(vec![eq("status", "active"), gt("age", 18)]);
//! // compiles to `(status = ? AND age > ?)` bound to ["active", 18]
//! ```

use crate::value::{Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
}

impl Comparison {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "!=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
            Comparison::Like => "LIKE",
            Comparison::ILike => "ILIKE",
        }
    }
}

/// A predicate tree. Leaves name a column; columns are checked against the
/// table only when the query is compiled.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Compare {
        op: Comparison,
        column: String,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    Between {
        column: String,
        min: Value,
        max: Value,
    },
    IsNull {
        column: String,
    },
    IsNotNull {
        column: String,
    },
    And(Vec<Operator>),
    Or(Vec<Operator>),
    Not(Box<Operator>),
}

impl Operator {
    pub fn is_composite(&self) -> bool {
        matches!(self, Operator::And(_) | Operator::Or(_) | Operator::Not(_))
    }

    /// Column referenced by a leaf, `None` for combinators.
    pub fn column(&self) -> Option<&str> {
        match self {
            Operator::Compare { column, .. }
            | Operator::In { column, .. }
            | Operator::Between { column, .. }
            | Operator::IsNull { column }
            | Operator::IsNotNull { column } => Some(column),
            Operator::And(_) | Operator::Or(_) | Operator::Not(_) => None,
        }
    }

    pub fn and(self, other: Operator) -> Operator {
        match self {
            Operator::And(mut conditions) => {
                conditions.push(other);
                Operator::And(conditions)
            }
            first => Operator::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Operator) -> Operator {
        match self {
            Operator::Or(mut conditions) => {
                conditions.push(other);
                Operator::Or(conditions)
            }
            first => Operator::Or(vec![first, other]),
        }
    }
}

impl std::ops::Not for Operator {
    type Output = Operator;

    fn not(self) -> Operator {
        Operator::Not(Box::new(self))
    }
}

fn compare(op: Comparison, column: impl Into<String>, value: impl Into<Value>) -> Operator {
    Operator::Compare {
        op,
        column: column.into(),
        value: value.into(),
    }
}

pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Operator {
    compare(Comparison::Eq, column, value)
}

pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Operator {
    compare(Comparison::Ne, column, value)
}

pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Operator {
    compare(Comparison::Gt, column, value)
}

pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Operator {
    compare(Comparison::Gte, column, value)
}

pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Operator {
    compare(Comparison::Lt, column, value)
}

pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Operator {
    compare(Comparison::Lte, column, value)
}

pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Operator {
    compare(Comparison::Like, column, Value::Text(pattern.into()))
}

pub fn ilike(column: impl Into<String>, pattern: impl Into<String>) -> Operator {
    compare(Comparison::ILike, column, Value::Text(pattern.into()))
}

pub fn in_array<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Operator {
    Operator::In {
        column: column.into(),
        values: values.into_iter().map(Into::into).collect(),
    }
}

pub fn between(column: impl Into<String>, min: impl Into<Value>, max: impl Into<Value>) -> Operator {
    Operator::Between {
        column: column.into(),
        min: min.into(),
        max: max.into(),
    }
}

pub fn is_null(column: impl Into<String>) -> Operator {
    Operator::IsNull {
        column: column.into(),
    }
}

pub fn is_not_null(column: impl Into<String>) -> Operator {
    Operator::IsNotNull {
        column: column.into(),
    }
}

pub fn and(conditions: impl IntoIterator<Item = Operator>) -> Operator {
    Operator::And(conditions.into_iter().collect())
}

pub fn or(conditions: impl IntoIterator<Item = Operator>) -> Operator {
    Operator::Or(conditions.into_iter().collect())
}

pub fn not(condition: Operator) -> Operator {
    Operator::Not(Box::new(condition))
}

/// A `WHERE`/`HAVING` input: either column equality on a record's fields (in
/// key order) or an operator tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Match(Record),
    Expr(Operator),
}

impl From<Record> for Condition {
    fn from(record: Record) -> Self {
        Condition::Match(record)
    }
}

impl From<Operator> for Condition {
    fn from(op: Operator) -> Self {
        Condition::Expr(op)
    }
}
