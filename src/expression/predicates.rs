//! Predicate algebra used by routing: conjunct splitting, CNF rewriting and
//! OR-to-IN folding

use crate::parser::ast::{BinaryOperator, Expression, UnaryOperator};

/// Split `a AND b AND c` into its conjuncts
pub fn split_conjuncts(expr: &Expression) -> Vec<Expression> {
    let mut result = Vec::new();
    collect(expr, BinaryOperator::And, &mut result);
    result
}

/// Split `a OR b OR c` into its disjuncts
pub fn split_disjuncts(expr: &Expression) -> Vec<Expression> {
    let mut result = Vec::new();
    collect(expr, BinaryOperator::Or, &mut result);
    result
}

fn collect(expr: &Expression, op: BinaryOperator, out: &mut Vec<Expression>) {
    match expr {
        Expression::Binary {
            left,
            operator,
            right,
        } if *operator == op => {
            collect(left, op, out);
            collect(right, op, out);
        }
        other => out.push(other.clone()),
    }
}

/// Fold predicates back into one conjunction; `None` for an empty list
pub fn and_all(predicates: impl IntoIterator<Item = Expression>) -> Option<Expression> {
    predicates
        .into_iter()
        .reduce(|acc, p| Expression::binary(acc, BinaryOperator::And, p))
}

fn or_all(predicates: impl IntoIterator<Item = Expression>) -> Option<Expression> {
    predicates
        .into_iter()
        .reduce(|acc, p| Expression::binary(acc, BinaryOperator::Or, p))
}

fn negate(expr: Expression) -> Expression {
    Expression::Unary {
        operator: UnaryOperator::Not,
        expression: Box::new(expr),
    }
}

/// Conjunctive normal form as a list of clauses, each a list of disjuncts.
/// Returns `None` once more than `limit` clauses would be produced.
fn clauses(expr: &Expression, limit: usize) -> Option<Vec<Vec<Expression>>> {
    let result = match expr {
        Expression::Binary {
            left,
            operator: BinaryOperator::And,
            right,
        } => {
            let mut l = clauses(left, limit)?;
            l.extend(clauses(right, limit)?);
            l
        }
        Expression::Binary {
            left,
            operator: BinaryOperator::Or,
            right,
        } => {
            let l = clauses(left, limit)?;
            let r = clauses(right, limit)?;
            if l.len().saturating_mul(r.len()) > limit {
                return None;
            }
            let mut product = Vec::with_capacity(l.len() * r.len());
            for a in &l {
                for b in &r {
                    let mut clause = a.clone();
                    for item in b {
                        if !clause.contains(item) {
                            clause.push(item.clone());
                        }
                    }
                    product.push(clause);
                }
            }
            product
        }
        Expression::Unary {
            operator: UnaryOperator::Not,
            expression,
        } => match expression.as_ref() {
            Expression::Unary {
                operator: UnaryOperator::Not,
                expression: inner,
            } => clauses(inner, limit)?,
            Expression::Binary {
                left,
                operator: BinaryOperator::And,
                right,
            } => clauses(
                &Expression::binary(
                    negate(left.as_ref().clone()),
                    BinaryOperator::Or,
                    negate(right.as_ref().clone()),
                ),
                limit,
            )?,
            Expression::Binary {
                left,
                operator: BinaryOperator::Or,
                right,
            } => clauses(
                &Expression::binary(
                    negate(left.as_ref().clone()),
                    BinaryOperator::And,
                    negate(right.as_ref().clone()),
                ),
                limit,
            )?,
            _ => vec![vec![expr.clone()]],
        },
        other => vec![vec![other.clone()]],
    };

    let mut deduped: Vec<Vec<Expression>> = Vec::with_capacity(result.len());
    for clause in result {
        if !deduped.contains(&clause) {
            deduped.push(clause);
        }
    }
    if deduped.len() > limit {
        return None;
    }
    Some(deduped)
}

/// Rewrite into conjunctive normal form with duplicate clauses and
/// duplicate disjuncts removed. `None` if the result would exceed `limit`
/// clauses.
pub fn to_cnf(expr: &Expression, limit: usize) -> Option<Expression> {
    let clauses = clauses(expr, limit)?;
    and_all(clauses.into_iter().filter_map(or_all))
}

/// `a = 1 OR a = 2 OR a IN (3, 4)` becomes `a IN (1, 2, 3, 4)`. Every
/// disjunct must constrain the same expression to constants.
pub fn or_to_in(expr: &Expression) -> Option<Expression> {
    let disjuncts = split_disjuncts(expr);
    if disjuncts.len() < 2 {
        return None;
    }

    let mut target: Option<Expression> = None;
    let mut values: Vec<Expression> = Vec::new();
    for disjunct in disjuncts {
        let (lhs, rhs) = match disjunct {
            Expression::Binary {
                left,
                operator: BinaryOperator::Equals,
                right,
            } => {
                if right.is_constant() && !left.is_constant() {
                    (*left, vec![*right])
                } else if left.is_constant() && !right.is_constant() {
                    (*right, vec![*left])
                } else {
                    return None;
                }
            }
            Expression::InList {
                expression,
                list,
                negated: false,
            } if list.iter().all(Expression::is_constant) => (*expression, list),
            _ => return None,
        };
        match &target {
            Some(existing) if *existing != lhs => return None,
            Some(_) => {}
            None => target = Some(lhs),
        }
        for value in rhs {
            if !values.contains(&value) {
                values.push(value);
            }
        }
    }

    Some(Expression::InList {
        expression: Box::new(target?),
        list: values,
        negated: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parser::Parser;
    use crate::parser::tokenizer::Tokenizer;

    fn expr(sql: &str) -> Expression {
        let tokens = Tokenizer::new().tokenize(sql).unwrap();
        Parser::new(tokens).parse_expression().unwrap()
    }

    #[test]
    fn test_split_conjuncts() {
        let parts = split_conjuncts(&expr("a = 1 and (b = 2 or c = 3) and d = 4"));
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].to_string(), "b = 2 or c = 3");
    }

    #[test]
    fn test_cnf_distributes_or_over_and() {
        let cnf = to_cnf(&expr("(id = 1 and uid = 2) or (id = 1 and uid = 3)"), 32).unwrap();
        assert_eq!(
            cnf.to_string(),
            "id = 1 and (id = 1 or uid = 3) and (uid = 2 or id = 1) and (uid = 2 or uid = 3)"
        );
    }

    #[test]
    fn test_cnf_pushes_negation_inward() {
        let cnf = to_cnf(&expr("not (a = 1 or b = 2)"), 32).unwrap();
        assert_eq!(cnf.to_string(), "not (a = 1) and not (b = 2)");
    }

    #[test]
    fn test_cnf_respects_limit() {
        let wide = expr("(a = 1 and b = 1) or (c = 1 and d = 1) or (e = 1 and f = 1)");
        assert!(to_cnf(&wide, 4).is_none());
        assert!(to_cnf(&wide, 8).is_some());
    }

    #[test]
    fn test_or_to_in() {
        let rewritten = or_to_in(&expr("id = 1 or 2 = id or id in (3, 1)")).unwrap();
        assert_eq!(rewritten.to_string(), "id in (1, 2, 3)");
        assert!(or_to_in(&expr("id = 1 or uid = 2")).is_none());
        assert!(or_to_in(&expr("id = 1")).is_none());
    }
}
