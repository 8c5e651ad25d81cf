//! Override expressions.
//!
//! Users tune backend attributes with small expressions such as
//! `[ReadDataByIdentifier, TesterPresent]` or `EcuReset not in [0x10, 0x27]`.
//! The language only knows literals, lists, logical/comparison/set operators
//! and the names in [`crate::uds::SERVICE_TABLE`]. There are no calls,
//! attribute accesses or other names to resolve.

mod lexer;
mod parser;
mod value;

pub use value::{coerce, AttributeValue, ServiceToggle, Value};

use crate::error::EvaluationError;
use crate::schema::AttributeSpec;

use parser::{CompareOp, Expr, Parser};

/// A raw user override for one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideRule {
    pub attribute: String,
    pub expression: String,
    /// Position in the user's input; later rules win.
    pub position: usize,
}

impl OverrideRule {
    pub fn new(attribute: impl Into<String>, expression: impl Into<String>, position: usize) -> Self {
        Self {
            attribute: attribute.into(),
            expression: expression.into(),
            position,
        }
    }
}

/// Parse and evaluate an expression to an untyped [`Value`].
pub fn evaluate(source: &str) -> Result<Value, EvaluationError> {
    let expr = Parser::new(source).parse()?;
    eval(&expr)
}

/// Evaluate an expression and coerce it to the attribute's declared kind.
pub fn evaluate_attribute(
    spec: &AttributeSpec,
    source: &str,
) -> Result<AttributeValue, EvaluationError> {
    coerce(spec.kind, evaluate(source)?)
}

fn eval(expr: &Expr) -> Result<Value, EvaluationError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::List(items) => items.iter().map(eval).collect::<Result<_, _>>().map(Value::List),
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner)?.truthy())),
        Expr::Negate(inner) => eval(inner)?.negate(),
        Expr::And(operands) => {
            for operand in operands {
                if !eval(operand)?.truthy() {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        Expr::Or(operands) => {
            for operand in operands {
                if eval(operand)?.truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Expr::Union(first, rest) => rest
            .iter()
            .try_fold(eval(first)?, |acc, operand| acc.union(eval(operand)?)),
        Expr::Intersection(first, rest) => rest
            .iter()
            .try_fold(eval(first)?, |acc, operand| acc.intersection(eval(operand)?)),
        Expr::Compare(first, rest) => {
            let mut left = eval(first)?;
            for (op, right) in rest {
                let right = eval(right)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, EvaluationError> {
    use std::cmp::Ordering;

    Ok(match op {
        CompareOp::Eq => left.loose_eq(right),
        CompareOp::Ne => !left.loose_eq(right),
        CompareOp::Lt => left.ordering(right, op.symbol())? == Ordering::Less,
        CompareOp::Le => left.ordering(right, op.symbol())? != Ordering::Greater,
        CompareOp::Gt => left.ordering(right, op.symbol())? == Ordering::Greater,
        CompareOp::Ge => left.ordering(right, op.symbol())? != Ordering::Less,
        CompareOp::In => left.contained_in(right)?,
        CompareOp::NotIn => !left.contained_in(right)?,
    })
}
