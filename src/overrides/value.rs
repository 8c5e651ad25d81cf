use std::collections::BTreeSet;
use std::fmt;

use crate::error::EvaluationError;
use crate::schema::AttributeKind;
use crate::uds::ServiceId;

/// Intermediate value produced while evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Service(ServiceId),
    List(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "a boolean",
            Value::Int(_) => "an integer",
            Value::Float(_) => "a float",
            Value::Service(_) => "a service identifier",
            Value::List(_) => "a list",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Service(_) => true,
            Value::List(items) => !items.is_empty(),
        }
    }

    /// Numeric view used by comparisons. Services compare by identifier.
    fn number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Service(id) => Some(f64::from(id.0)),
            Value::Bool(_) | Value::List(_) => None,
        }
    }

    pub(crate) fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            _ => match (self.number(), other.number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    pub(crate) fn ordering(
        &self,
        other: &Value,
        op: &'static str,
    ) -> Result<std::cmp::Ordering, EvaluationError> {
        match (self.number(), other.number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(|| invalid(op, self, other)),
            _ => Err(invalid(op, self, other)),
        }
    }

    pub(crate) fn contained_in(&self, container: &Value) -> Result<bool, EvaluationError> {
        match container {
            Value::List(items) => Ok(items.iter().any(|item| item.loose_eq(self))),
            other => Err(invalid("in", self, other)),
        }
    }

    /// `|`: union for services and lists, bitwise for integers.
    pub(crate) fn union(self, other: Value) -> Result<Value, EvaluationError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a | b)),
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a || b)),
            (a, b) if a.is_collection() && b.is_collection() => {
                let mut items = a.into_items();
                for item in b.into_items() {
                    if !items.iter().any(|existing| existing.loose_eq(&item)) {
                        items.push(item);
                    }
                }
                Ok(Value::List(items))
            }
            (a, b) => Err(invalid("|", &a, &b)),
        }
    }

    /// `&`: intersection for services and lists, bitwise for integers.
    pub(crate) fn intersection(self, other: Value) -> Result<Value, EvaluationError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a & b)),
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a && b)),
            (a, b) if a.is_collection() && b.is_collection() => {
                let right = b.into_items();
                let items = a
                    .into_items()
                    .into_iter()
                    .filter(|item| right.iter().any(|other| other.loose_eq(item)))
                    .collect();
                Ok(Value::List(items))
            }
            (a, b) => Err(invalid("&", &a, &b)),
        }
    }

    pub(crate) fn negate(self) -> Result<Value, EvaluationError> {
        match self {
            Value::Int(i) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| EvaluationError::OutOfRange {
                    value: i.to_string(),
                    expected: "a negatable integer",
                }),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(EvaluationError::InvalidOperands {
                op: "-",
                operands: other.type_name().to_string(),
            }),
        }
    }

    fn is_collection(&self) -> bool {
        matches!(self, Value::Service(_) | Value::List(_))
    }

    fn into_items(self) -> Vec<Value> {
        match self {
            Value::List(items) => items,
            single => vec![single],
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Service(id) => write!(f, "{id}"),
            Value::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

fn invalid(op: &'static str, left: &Value, right: &Value) -> EvaluationError {
    EvaluationError::InvalidOperands {
        op,
        operands: format!("{} and {}", left.type_name(), right.type_name()),
    }
}

/// A default-response toggle, optionally scoped to specific services.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ServiceToggle {
    #[default]
    Always,
    Never,
    Only(BTreeSet<ServiceId>),
}

impl ServiceToggle {
    pub fn applies_to(&self, sid: ServiceId) -> bool {
        match self {
            ServiceToggle::Always => true,
            ServiceToggle::Never => false,
            ServiceToggle::Only(services) => services.contains(&sid),
        }
    }
}

/// Evaluated override, typed to the attribute it targets.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Toggle(ServiceToggle),
    Probability(f64),
    Sessions(Vec<u8>),
    Services(Vec<ServiceId>),
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::Toggle(_) => AttributeKind::Toggle,
            AttributeValue::Probability(_) => AttributeKind::Probability,
            AttributeValue::Sessions(_) => AttributeKind::Sessions,
            AttributeValue::Services(_) => AttributeKind::Services,
        }
    }
}

/// Convert an evaluated value into the shape `kind` expects.
pub fn coerce(kind: AttributeKind, value: Value) -> Result<AttributeValue, EvaluationError> {
    match kind {
        AttributeKind::Toggle => match value {
            Value::Bool(true) => Ok(AttributeValue::Toggle(ServiceToggle::Always)),
            Value::Bool(false) => Ok(AttributeValue::Toggle(ServiceToggle::Never)),
            value @ (Value::Service(_) | Value::List(_)) => {
                let services: BTreeSet<_> = service_list(value)?.into_iter().collect();
                if services.is_empty() {
                    Ok(AttributeValue::Toggle(ServiceToggle::Never))
                } else {
                    Ok(AttributeValue::Toggle(ServiceToggle::Only(services)))
                }
            }
            other => Err(mismatch("a boolean or service identifiers", &other)),
        },
        AttributeKind::Probability => {
            let p = match value {
                Value::Int(i) => i as f64,
                Value::Float(f) => f,
                other => return Err(mismatch("a probability", &other)),
            };
            if (0.0..=1.0).contains(&p) {
                Ok(AttributeValue::Probability(p))
            } else {
                Err(EvaluationError::OutOfRange {
                    value: p.to_string(),
                    expected: "0.0..=1.0",
                })
            }
        }
        AttributeKind::Sessions => {
            let items = match value {
                Value::Int(_) => vec![value],
                Value::List(items) => items,
                other => return Err(mismatch("session numbers", &other)),
            };
            items
                .into_iter()
                .map(|item| match item {
                    Value::Int(i) => byte(i),
                    other => Err(mismatch("a session number", &other)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(AttributeValue::Sessions)
        }
        AttributeKind::Services => service_list(value).map(AttributeValue::Services),
    }
}

fn service_list(value: Value) -> Result<Vec<ServiceId>, EvaluationError> {
    let items = match value {
        Value::List(items) => items,
        single @ (Value::Service(_) | Value::Int(_)) => vec![single],
        other => return Err(mismatch("service identifiers", &other)),
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Service(id) => Ok(id),
            Value::Int(i) => byte(i).map(ServiceId),
            other => Err(mismatch("a service identifier", &other)),
        })
        .collect()
}

fn byte(i: i64) -> Result<u8, EvaluationError> {
    u8::try_from(i).map_err(|_| EvaluationError::OutOfRange {
        value: i.to_string(),
        expected: "0..=255",
    })
}

fn mismatch(expected: &'static str, found: &Value) -> EvaluationError {
    EvaluationError::TypeMismatch {
        expected,
        found: format!("{} ({found})", found.type_name()),
    }
}
