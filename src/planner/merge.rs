//! Route merging
//!
//! Decides whether two routes can run as one query: a join or union of
//! their interiors sent to the destinations of the merged routing.

use crate::parser::ast::{BinaryOperator, Expression};
use crate::planner::routing::{KeyCandidate, KeyspaceRouting, Opcode, Routing, SplitGroup};

/// Routing of the merged route for `lhs JOIN rhs ON predicates`, if the
/// join can be evaluated inside one route
pub fn try_merge_join(
    lhs: &Routing,
    rhs: &Routing,
    predicates: &[Expression],
    left_join: bool,
) -> Option<Routing> {
    match (lhs, rhs) {
        (Routing::Dual, Routing::Dual) => Some(Routing::Dual),
        // the dual row must not be produced once per destination
        (Routing::Dual, other) if left_join && !other.is_single() => None,
        (Routing::Dual, other) | (other, Routing::Dual) => Some(other.clone()),
        (Routing::Keyspace(l), Routing::Keyspace(r)) => {
            merge_keyspace_join(l, r, predicates, left_join).map(Routing::Keyspace)
        }
    }
}

fn merge_keyspace_join(
    lhs: &KeyspaceRouting,
    rhs: &KeyspaceRouting,
    predicates: &[Expression],
    left_join: bool,
) -> Option<KeyspaceRouting> {
    if lhs.keyspace.name != rhs.keyspace.name {
        return None;
    }
    if left_join && rhs.impossible {
        return None;
    }
    if !shards_colocated(lhs, rhs, predicates) {
        return None;
    }

    let mut merged = lhs.clone();
    let mut right = rhs.clone();
    if left_join {
        for candidate in right.shard_keys.iter_mut() {
            candidate.outer = true;
        }
    }
    merged.shard_keys.extend(right.shard_keys);

    for mut group in right.splits {
        let lockstep = merged
            .splits
            .iter()
            .position(|existing| in_lockstep(existing, &group, predicates));
        match lockstep {
            Some(index) => {
                if left_join {
                    for candidate in group.candidates.iter_mut() {
                        candidate.outer = true;
                    }
                }
                let target = &mut merged.splits[index];
                target.tables.extend(group.tables);
                target.candidates.extend(group.candidates);
            }
            None => {
                // an independent inner sub-table must be pinned, or the
                // outer rows would repeat once per sub-table
                if left_join && group.opcode(rhs.impossible) != Opcode::EqualUnique {
                    return None;
                }
                merged.splits.push(group);
            }
        }
    }

    if !left_join {
        merged.seen.extend(rhs.seen.iter().cloned());
        merged.impossible |= rhs.impossible;
    }
    Some(merged)
}

/// Whether every row pair the join can produce lives on one shard
fn shards_colocated(lhs: &KeyspaceRouting, rhs: &KeyspaceRouting, predicates: &[Expression]) -> bool {
    if !lhs.keyspace.sharded {
        return true;
    }
    let (l, r) = (lhs.opcode(), rhs.opcode());
    if l == Opcode::None || r == Opcode::None {
        return true;
    }
    if l.is_single() && r.is_single() {
        let targets = lhs.shard_targets();
        return targets.len() == 1 && targets == rhs.shard_targets();
    }
    equated(&lhs.shard_keys, &rhs.shard_keys, predicates)
}

fn in_lockstep(lhs: &SplitGroup, rhs: &SplitGroup, predicates: &[Expression]) -> bool {
    lhs.table_count == rhs.table_count && equated(&lhs.candidates, &rhs.candidates, predicates)
}

/// Some pair of compatible keys is joined on equality column by column
fn equated(lhs: &[KeyCandidate], rhs: &[KeyCandidate], predicates: &[Expression]) -> bool {
    lhs.iter().any(|l| {
        rhs.iter().any(|r| {
            l.function.compatible(&r.function)
                && l.columns.len() == r.columns.len()
                && l.columns
                    .iter()
                    .zip(&r.columns)
                    .all(|(lc, rc)| joined_on(predicates, (l.table_id, lc), (r.table_id, rc)))
        })
    })
}

fn joined_on(predicates: &[Expression], lhs: (usize, &str), rhs: (usize, &str)) -> bool {
    let is = |expr: &Expression, (table, name): (usize, &str)| match expr {
        Expression::Column(col) => col.binding == Some(table) && col.name == name,
        _ => false,
    };
    predicates.iter().any(|p| match p {
        Expression::Binary {
            left,
            operator: BinaryOperator::Equals,
            right,
        } => (is(left, lhs) && is(right, rhs)) || (is(left, rhs) && is(right, lhs)),
        _ => false,
    })
}

/// Routing of one route producing the rows of both inputs, if their
/// destinations match exactly
pub fn try_merge_union(lhs: &Routing, rhs: &Routing) -> Option<Routing> {
    match (lhs, rhs) {
        (Routing::Dual, Routing::Dual) => Some(Routing::Dual),
        (Routing::Dual, other) | (other, Routing::Dual) => {
            other.is_single().then(|| other.clone())
        }
        (Routing::Keyspace(l), Routing::Keyspace(r)) => merge_keyspace_union(l, r).map(Routing::Keyspace),
    }
}

fn merge_keyspace_union(lhs: &KeyspaceRouting, rhs: &KeyspaceRouting) -> Option<KeyspaceRouting> {
    if lhs.keyspace.name != rhs.keyspace.name
        || lhs.fan_out() != rhs.fan_out()
        || lhs.splits.len() != rhs.splits.len()
    {
        return None;
    }

    let (l, r) = (lhs.opcode(), rhs.opcode());
    let shards = !lhs.keyspace.sharded
        || (l == Opcode::Scatter && r == Opcode::Scatter)
        || (l.is_single() && r.is_single() && lhs.shard_targets() == rhs.shard_targets());
    if !shards {
        return None;
    }

    for (lg, rg) in lhs.splits.iter().zip(&rhs.splits) {
        let (a, b) = (lg.opcode(lhs.impossible), rg.opcode(rhs.impossible));
        let same = lg.table_count == rg.table_count
            && match (a, b) {
                (Opcode::Scatter, Opcode::Scatter) => true,
                (Opcode::EqualUnique, Opcode::EqualUnique) | (Opcode::None, Opcode::None) => {
                    lg.targets(lhs.impossible) == rg.targets(rhs.impossible)
                }
                _ => false,
            };
        if !same {
            return None;
        }
    }

    let mut merged = lhs.clone();
    merged.shard_keys.extend(rhs.shard_keys.iter().cloned());
    for (target, group) in merged.splits.iter_mut().zip(&rhs.splits) {
        target.tables.extend(group.tables.iter().cloned());
        target.candidates.extend(group.candidates.iter().cloned());
    }
    merged.seen.extend(rhs.seen.iter().cloned());
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::evaluator::{BindVars, StaticEvaluator};
    use crate::parser::ast::ColumnName;
    use crate::schema::{SchemaLookup, VSchema};
    use crate::types::Value;

    const VSCHEMA: &str = r#"{"keyspaces": {
        "main": {
            "sharded": true,
            "shards": ["-80", "80-"],
            "vindexes": {"hash": {"type": "hash"}},
            "tables": {
                "a": {"columns": [{"name": "id"}, {"name": "k"}],
                      "column_vindexes": [{"columns": ["id"], "name": "hash"}],
                      "split": {"columns": ["k"], "function": "mod", "table_count": 4}},
                "b": {"columns": [{"name": "id"}, {"name": "k"}],
                      "column_vindexes": [{"columns": ["id"], "name": "hash"}],
                      "split": {"columns": ["k"], "function": "mod", "table_count": 4}},
                "c": {"columns": [{"name": "id"}, {"name": "k"}],
                      "column_vindexes": [{"columns": ["id"], "name": "hash"}],
                      "split": {"columns": ["k"], "function": "mod", "table_count": 8}}
            }
        },
        "other": {"sharded": false, "tables": {"u": {"columns": [{"name": "id"}]}}}
    }}"#;

    fn routing(table: &str, id: usize) -> KeyspaceRouting {
        let vschema = VSchema::from_json(VSCHEMA).unwrap();
        KeyspaceRouting::for_table(id, &vschema.find_table(table).unwrap())
    }

    fn col(table: &str, name: &str, id: usize) -> Expression {
        Expression::Column(ColumnName::bound(table, name, id))
    }

    fn pin(routing: &mut KeyspaceRouting, table: &str, name: &str, id: usize, value: i64) {
        let vars = BindVars::new();
        let predicate = Expression::eq(col(table, name, id), Expression::Literal(Value::Integer(value)));
        routing.update(&predicate, &StaticEvaluator::new(&vars));
    }

    #[test]
    fn test_join_on_both_keys_merges_in_lockstep() {
        let a = routing("a", 0);
        let b = routing("b", 1);
        let predicates = vec![
            Expression::eq(col("a", "id", 0), col("b", "id", 1)),
            Expression::eq(col("a", "k", 0), col("b", "k", 1)),
        ];
        let merged = match try_merge_join(&Routing::Keyspace(a), &Routing::Keyspace(b), &predicates, false) {
            Some(Routing::Keyspace(ks)) => ks,
            other => panic!("expected a merge, got {:?}", other),
        };
        assert_eq!(merged.splits.len(), 1);
        assert_eq!(merged.splits[0].tables.len(), 2);
        assert_eq!(merged.fan_out(), 4);
    }

    #[test]
    fn test_join_without_key_equality_does_not_merge() {
        let a = Routing::Keyspace(routing("a", 0));
        let b = Routing::Keyspace(routing("b", 1));
        let predicates = vec![Expression::eq(col("a", "k", 0), col("b", "id", 1))];
        assert!(try_merge_join(&a, &b, &predicates, false).is_none());
    }

    #[test]
    fn test_join_pinned_to_one_shard_merges() {
        let mut a = routing("a", 0);
        let mut b = routing("b", 1);
        pin(&mut a, "a", "id", 0, 5);
        pin(&mut b, "b", "id", 1, 5);
        let merged = try_merge_join(&Routing::Keyspace(a), &Routing::Keyspace(b), &[], false).unwrap();
        assert_eq!(merged.opcode(), Opcode::EqualUnique);
        match merged {
            // independent split groups multiply
            Routing::Keyspace(ks) => assert_eq!(ks.fan_out(), 16),
            Routing::Dual => unreachable!(),
        }
    }

    #[test]
    fn test_left_join_needs_pinned_inner_sub_table() {
        let mut a = routing("a", 0);
        let mut b = routing("b", 1);
        pin(&mut a, "a", "id", 0, 5);
        pin(&mut b, "b", "id", 1, 5);
        let predicates = vec![Expression::eq(col("a", "id", 0), col("b", "id", 1))];
        let (a, b) = (Routing::Keyspace(a), Routing::Keyspace(b));
        assert!(try_merge_join(&a, &b, &predicates, true).is_none());

        let mut pinned = match b {
            Routing::Keyspace(ks) => ks,
            Routing::Dual => unreachable!(),
        };
        pin(&mut pinned, "b", "k", 1, 2);
        let merged = try_merge_join(&a, &Routing::Keyspace(pinned), &predicates, true).unwrap();
        match merged {
            Routing::Keyspace(ks) => {
                assert!(ks.shard_keys.iter().filter(|c| c.table_id == 1).all(|c| c.outer));
            }
            Routing::Dual => unreachable!(),
        }
    }

    #[test]
    fn test_dual_rules() {
        let a = Routing::Keyspace(routing("a", 0));
        assert!(matches!(try_merge_join(&Routing::Dual, &Routing::Dual, &[], false), Some(Routing::Dual)));
        assert!(try_merge_join(&a, &Routing::Dual, &[], true).is_some());
        assert!(try_merge_join(&Routing::Dual, &a, &[], true).is_none());
        assert!(try_merge_union(&Routing::Dual, &a).is_none());
    }

    #[test]
    fn test_cross_keyspace_never_merges() {
        let vschema = VSchema::from_json(VSCHEMA).unwrap();
        let u = Routing::for_table(1, &vschema.find_table("u").unwrap());
        let a = Routing::Keyspace(routing("a", 0));
        assert!(try_merge_join(&a, &u, &[], false).is_none());
        assert!(try_merge_union(&a, &u).is_none());
    }

    #[test]
    fn test_union_requires_equal_fan_out() {
        let a = Routing::Keyspace(routing("a", 0));
        let b = Routing::Keyspace(routing("b", 1));
        let c = Routing::Keyspace(routing("c", 2));
        assert!(try_merge_union(&a, &b).is_some());
        assert!(try_merge_union(&a, &c).is_none());

        let mut pinned = routing("b", 1);
        pin(&mut pinned, "b", "id", 1, 5);
        assert!(try_merge_union(&a, &Routing::Keyspace(pinned)).is_none());
    }
}
