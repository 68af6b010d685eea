//! Run conditions for nodes.
//!
//! Grammar:
//! - `scope.name op literal` where `scope` is `variables` (alias `var`) or
//!   `shared` (alias `sharedData`) and `op` is one of `lt`, `lte`, `gt`,
//!   `gte`, `eq`
//! - `exists:name`, optionally with a scope prefix (`exists:shared.token`)
//!
//! Literals are numbers, `true`/`false`, `null`, single- or double-quoted
//! strings, or bare words.

use crate::context::ExecutionContext;
use crate::error::ConditionError;
use crate::template::{Variables, lookup_path, string_form};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Which map a condition reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Variables,
    Shared,
}

impl Scope {
    fn parse(scope: &str) -> Option<Self> {
        match scope {
            "variables" | "var" => Some(Self::Variables),
            "shared" | "sharedData" => Some(Self::Shared),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variables => f.write_str("variables"),
            Self::Shared => f.write_str("shared"),
        }
    }
}

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl Comparison {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Eq => "eq",
        }
    }
}

impl FromStr for Comparison {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "eq" => Ok(Self::Eq),
            other => Err(ConditionError::UnknownOperator {
                operator: other.to_string(),
            }),
        }
    }
}

/// A parsed run condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// True if the named entry is present.
    Exists { scope: Scope, name: String },
    /// Compares a named entry against a literal.
    Compare {
        scope: Scope,
        name: String,
        op: Comparison,
        literal: JsonValue,
    },
}

impl Condition {
    /// Evaluates the condition against a context's current variables and
    /// shared data.
    #[must_use]
    pub fn evaluate(&self, context: &ExecutionContext) -> bool {
        self.evaluate_with(&context.variables(), &context.shared_data())
    }

    /// Evaluates the condition against explicit maps.
    #[must_use]
    pub fn evaluate_with(&self, variables: &Variables, shared: &Variables) -> bool {
        let source = |scope: Scope| match scope {
            Scope::Variables => variables,
            Scope::Shared => shared,
        };

        match self {
            Self::Exists { scope, name } => lookup_path(source(*scope), name).is_some(),
            Self::Compare {
                scope,
                name,
                op,
                literal,
            } => match lookup_path(source(*scope), name) {
                Some(actual) => compare(actual, *op, literal),
                None => false,
            },
        }
    }
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn compare(actual: &JsonValue, op: Comparison, literal: &JsonValue) -> bool {
    if let (Some(a), Some(b)) = (as_number(actual), as_number(literal)) {
        return match op {
            Comparison::Lt => a < b,
            Comparison::Lte => a <= b,
            Comparison::Gt => a > b,
            Comparison::Gte => a >= b,
            Comparison::Eq => a == b,
        };
    }

    match op {
        Comparison::Eq => string_form(actual) == string_form(literal),
        _ => false,
    }
}

fn parse_literal(raw: &str) -> JsonValue {
    let quoted = raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\'')));
    if quoted {
        return JsonValue::String(raw[1..raw.len() - 1].to_string());
    }

    match raw {
        "true" => JsonValue::Bool(true),
        "false" => JsonValue::Bool(false),
        "null" => JsonValue::Null,
        _ => {
            if let Ok(n) = raw.parse::<i64>() {
                return JsonValue::from(n);
            }
            raw.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map_or_else(|| JsonValue::String(raw.to_string()), JsonValue::Number)
        }
    }
}

fn split_token(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim_start()),
        None => (text, ""),
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() {
            return Err(ConditionError::Empty);
        }
        let malformed = || ConditionError::Malformed {
            condition: text.to_string(),
        };

        if let Some(target) = text.strip_prefix("exists:") {
            let target = target.trim();
            if target.is_empty() {
                return Err(malformed());
            }
            let (scope, name) = match target.split_once('.') {
                Some((prefix, rest)) if !rest.is_empty() => match Scope::parse(prefix) {
                    Some(scope) => (scope, rest),
                    None => (Scope::Variables, target),
                },
                _ => (Scope::Variables, target),
            };
            return Ok(Self::Exists {
                scope,
                name: name.to_string(),
            });
        }

        let (path, rest) = split_token(text);
        let (op, literal) = split_token(rest);
        if op.is_empty() || literal.is_empty() {
            return Err(malformed());
        }

        let (scope, name) = path.split_once('.').ok_or_else(malformed)?;
        if name.is_empty() {
            return Err(malformed());
        }
        let scope = Scope::parse(scope).ok_or_else(|| ConditionError::UnknownScope {
            scope: scope.to_string(),
        })?;

        Ok(Self::Compare {
            scope,
            name: name.to_string(),
            op: op.parse()?,
            literal: parse_literal(literal.trim_end()),
        })
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exists { scope, name } => write!(f, "exists:{scope}.{name}"),
            Self::Compare {
                scope,
                name,
                op,
                literal,
            } => write!(f, "{scope}.{name} {} {literal}", op.as_str()),
        }
    }
}
