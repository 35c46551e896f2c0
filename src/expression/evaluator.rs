//! Static evaluation of expressions at planning time
//!
//! Only literals, supplied bind variables and arithmetic or logic over them
//! can be evaluated. Anything else is "not statically evaluable", which is
//! never an error: the caller simply cannot use the expression for routing.

use crate::parser::ast::{BinaryOperator, Expression, UnaryOperator};
use crate::types::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Bind variables supplied alongside the statement
pub type BindVars = HashMap<String, Value>;

pub struct StaticEvaluator<'a> {
    bind_vars: &'a BindVars,
}

impl<'a> StaticEvaluator<'a> {
    pub fn new(bind_vars: &'a BindVars) -> Self {
        Self { bind_vars }
    }

    pub fn evaluate(&self, expr: &Expression) -> Option<Value> {
        match expr {
            Expression::Literal(value) => Some(value.clone()),
            Expression::BindVariable(name) => self.bind_vars.get(name).cloned(),
            Expression::Unary {
                operator,
                expression,
            } => {
                let value = self.evaluate(expression)?;
                match operator {
                    UnaryOperator::Plus => Some(value),
                    UnaryOperator::Minus => match value {
                        Value::Null => Some(Value::Null),
                        Value::Integer(i) => i.checked_neg().map(Value::Integer),
                        Value::Double(d) => Some(Value::double(-d.0)),
                        _ => None,
                    },
                    UnaryOperator::Not => Some(match value.as_bool() {
                        Some(b) => Value::Boolean(!b),
                        None => Value::Null,
                    }),
                }
            }
            Expression::Binary {
                left,
                operator,
                right,
            } => self.evaluate_binary(left, *operator, right),
            Expression::IsNull {
                expression,
                negated,
            } => {
                let value = self.evaluate(expression)?;
                Some(Value::Boolean(value.is_null() != *negated))
            }
            Expression::InList {
                expression,
                list,
                negated,
            } => {
                let needle = self.evaluate(expression)?;
                if needle.is_null() {
                    return Some(Value::Null);
                }
                let mut saw_null = false;
                for item in list {
                    let value = self.evaluate(item)?;
                    if value.is_null() {
                        saw_null = true;
                        continue;
                    }
                    if compare(&needle, &value)? == Ordering::Equal {
                        return Some(Value::Boolean(!negated));
                    }
                }
                if saw_null {
                    Some(Value::Null)
                } else {
                    Some(Value::Boolean(*negated))
                }
            }
            Expression::Between {
                expression,
                low,
                high,
                negated,
            } => {
                let value = self.evaluate(expression)?;
                let low = self.evaluate(low)?;
                let high = self.evaluate(high)?;
                if value.is_null() || low.is_null() || high.is_null() {
                    return Some(Value::Null);
                }
                let inside = compare(&value, &low)? != Ordering::Less
                    && compare(&value, &high)? != Ordering::Greater;
                Some(Value::Boolean(inside != *negated))
            }
            _ => None,
        }
    }

    fn evaluate_binary(
        &self,
        left: &Expression,
        operator: BinaryOperator,
        right: &Expression,
    ) -> Option<Value> {
        match operator {
            BinaryOperator::And | BinaryOperator::Or => {
                let l = self.evaluate(left)?.as_bool();
                let r = self.evaluate(right)?.as_bool();
                let result = if operator == BinaryOperator::And {
                    match (l, r) {
                        (Some(false), _) | (_, Some(false)) => Some(false),
                        (Some(true), Some(true)) => Some(true),
                        _ => None,
                    }
                } else {
                    match (l, r) {
                        (Some(true), _) | (_, Some(true)) => Some(true),
                        (Some(false), Some(false)) => Some(false),
                        _ => None,
                    }
                };
                Some(result.map(Value::Boolean).unwrap_or(Value::Null))
            }
            _ => {
                let l = self.evaluate(left)?;
                let r = self.evaluate(right)?;
                if l.is_null() || r.is_null() {
                    return Some(Value::Null);
                }
                if operator.is_comparison() {
                    let ordering = compare(&l, &r)?;
                    let result = match operator {
                        BinaryOperator::Equals => ordering == Ordering::Equal,
                        BinaryOperator::NotEquals => ordering != Ordering::Equal,
                        BinaryOperator::LessThan => ordering == Ordering::Less,
                        BinaryOperator::LessThanOrEqual => ordering != Ordering::Greater,
                        BinaryOperator::GreaterThan => ordering == Ordering::Greater,
                        BinaryOperator::GreaterThanOrEqual => ordering != Ordering::Less,
                        _ => return None,
                    };
                    return Some(Value::Boolean(result));
                }
                arithmetic(&l, operator, &r)
            }
        }
    }
}

/// Ordering of two non-null values. Text is only decidable when byte-equal:
/// any other outcome depends on the column collation.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Integer(l), Value::Integer(r)) => Some(l.cmp(r)),
        (Value::Varchar(l), Value::Varchar(r)) if l == r => Some(Ordering::Equal),
        (Value::Varchar(_), Value::Varchar(_)) => None,
        (Value::Boolean(l), Value::Boolean(r)) => Some(l.cmp(r)),
        (l, r) if !matches!(l, Value::Varchar(_)) && !matches!(r, Value::Varchar(_)) => {
            l.as_f64()?.partial_cmp(&r.as_f64()?)
        }
        _ => None,
    }
}

fn arithmetic(left: &Value, operator: BinaryOperator, right: &Value) -> Option<Value> {
    if let (Value::Integer(l), Value::Integer(r)) = (left, right) {
        return match operator {
            BinaryOperator::Add => l.checked_add(*r).map(Value::Integer),
            BinaryOperator::Subtract => l.checked_sub(*r).map(Value::Integer),
            BinaryOperator::Multiply => l.checked_mul(*r).map(Value::Integer),
            BinaryOperator::Modulo if *r != 0 => Some(Value::Integer(l % r)),
            BinaryOperator::Modulo | BinaryOperator::Divide if *r == 0 => Some(Value::Null),
            BinaryOperator::Divide => Some(Value::double(*l as f64 / *r as f64)),
            _ => None,
        };
    }
    if matches!(left, Value::Varchar(_)) || matches!(right, Value::Varchar(_)) {
        return None;
    }
    let l = left.as_f64()?;
    let r = right.as_f64()?;
    match operator {
        BinaryOperator::Add => Some(Value::double(l + r)),
        BinaryOperator::Subtract => Some(Value::double(l - r)),
        BinaryOperator::Multiply => Some(Value::double(l * r)),
        BinaryOperator::Divide if r == 0.0 => Some(Value::Null),
        BinaryOperator::Divide => Some(Value::double(l / r)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::ColumnName;

    fn int(v: i64) -> Expression {
        Expression::Literal(Value::Integer(v))
    }

    #[test]
    fn test_literals_and_bind_variables() {
        let mut vars = BindVars::new();
        vars.insert("id".to_string(), Value::Integer(7));
        let eval = StaticEvaluator::new(&vars);
        assert_eq!(eval.evaluate(&Expression::BindVariable("id".to_string())), Some(Value::Integer(7)));
        assert_eq!(eval.evaluate(&Expression::BindVariable("other".to_string())), None);
        assert_eq!(
            eval.evaluate(&Expression::binary(int(2), BinaryOperator::Add, int(3))),
            Some(Value::Integer(5))
        );
    }

    #[test]
    fn test_constant_predicates() {
        let vars = BindVars::new();
        let eval = StaticEvaluator::new(&vars);
        assert_eq!(eval.evaluate(&Expression::eq(int(1), int(0))), Some(Value::Boolean(false)));
        assert_eq!(
            eval.evaluate(&Expression::eq(int(1), Expression::Literal(Value::Null))),
            Some(Value::Null)
        );
        let column = Expression::Column(ColumnName::new(None, "a"));
        assert_eq!(eval.evaluate(&Expression::eq(column, int(1))), None);
    }

    #[test]
    fn test_text_comparison_is_collation_dependent() {
        let vars = BindVars::new();
        let eval = StaticEvaluator::new(&vars);
        let a = Expression::Literal(Value::varchar("a"));
        let upper = Expression::Literal(Value::varchar("A"));
        assert_eq!(eval.evaluate(&Expression::eq(a.clone(), upper)), None);
        assert_eq!(eval.evaluate(&Expression::eq(a.clone(), a)), Some(Value::Boolean(true)));
    }
}
