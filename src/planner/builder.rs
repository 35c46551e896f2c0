//! Initial operator tree
//!
//! Turns a bound statement into the starting plan: one route per table,
//! joins between them, predicates placed as deep as their dependencies
//! allow, and a horizon holding everything after FROM and WHERE.

use crate::common::error::PlannerResult;
use crate::expression::predicates::split_conjuncts;
use crate::internal_err;
use crate::parser::ast::{
    BinaryOperator, Expression, JoinType, Query, SelectStatement, TableReference, UnionStatement,
};
use crate::planner::binder::{output_names, SemanticTable, TableKind};
use crate::planner::logical_plan::*;
use crate::planner::routing::Routing;

pub struct PlanBuilder<'a> {
    arena: &'a mut PlanArena,
    semantics: &'a SemanticTable,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(arena: &'a mut PlanArena, semantics: &'a SemanticTable) -> Self {
        Self { arena, semantics }
    }

    /// Build the tree for a bound query, returning its root
    pub fn build(&mut self, query: &Query) -> PlannerResult<OpId> {
        self.build_query(query, None)
    }

    fn build_query(&mut self, query: &Query, derived: Option<DerivedInfo>) -> PlannerResult<OpId> {
        match query {
            Query::Select(select) => self.build_select(select, derived),
            Query::Union(union) => match derived {
                None => self.build_union(union),
                Some(info) => Err(internal_err!(
                    "derived table {} defined by a UNION reached the builder",
                    info.alias
                )),
            },
        }
    }

    fn build_select(
        &mut self,
        select: &SelectStatement,
        derived: Option<DerivedInfo>,
    ) -> PlannerResult<OpId> {
        let mut root: Option<OpId> = None;
        let mut scope = Vec::new();
        for table in &select.from {
            collect_bindings(table, &mut scope);
            let id = self.build_table_ref(table)?;
            root = Some(match root {
                None => id,
                Some(lhs) => self.arena.add(Operator::Join(Join {
                    lhs,
                    rhs: id,
                    predicate: None,
                    left_join: false,
                })),
            });
        }
        let root = root.ok_or_else(|| internal_err!("SELECT without a FROM reached the builder"))?;

        if let Some(predicate) = &select.where_clause {
            for conjunct in split_conjuncts(predicate) {
                self.place_predicate(root, conjunct)?;
            }
        }

        let mut clauses = select.clone();
        clauses.from.clear();
        clauses.where_clause = None;
        Ok(self.arena.add(Operator::Horizon(Horizon {
            source: root,
            select: clauses,
            scope,
            derived,
        })))
    }

    fn build_union(&mut self, union: &UnionStatement) -> PlannerResult<OpId> {
        let mut inputs = Vec::new();
        self.flatten_union(&union.left, union.distinct, &mut inputs)?;
        self.flatten_union(&union.right, union.distinct, &mut inputs)?;

        let names = output_names(&union.left);
        let columns = names.iter().map(|n| Expression::column(None, n)).collect();
        let mut root = self.arena.add(Operator::Union(Union {
            inputs,
            distinct: union.distinct,
            columns,
        }));
        if !union.order_by.is_empty() {
            root = self.arena.add(Operator::Ordering(Ordering {
                source: root,
                keys: union.order_by.iter().map(RouteOrdering::new).collect(),
                pushed: false,
            }));
        }
        if let Some(limit) = &union.limit {
            root = self.arena.add(Operator::Limit(Limit {
                source: root,
                count: limit.limit,
                offset: limit.offset,
                pushed: false,
            }));
        }
        Ok(root)
    }

    /// A nested union without its own ORDER BY or LIMIT joins its parent's
    /// inputs when doing so cannot change which duplicates survive
    fn flatten_union(&mut self, query: &Query, distinct: bool, out: &mut Vec<OpId>) -> PlannerResult<()> {
        if let Query::Union(inner) = query {
            let plain = inner.order_by.is_empty() && inner.limit.is_none();
            if plain && (inner.distinct == distinct || distinct) {
                self.flatten_union(&inner.left, distinct, out)?;
                return self.flatten_union(&inner.right, distinct, out);
            }
        }
        out.push(self.build_query(query, None)?);
        Ok(())
    }

    fn build_table_ref(&mut self, table: &TableReference) -> PlannerResult<OpId> {
        match table {
            TableReference::Table { binding, .. } => {
                let table_id = binding.ok_or_else(|| internal_err!("unbound table {:?}", table))?;
                let info = self.semantics.table(table_id)?;
                let routing = match &info.kind {
                    TableKind::Real(resolved) => Routing::for_table(table_id, resolved),
                    TableKind::Dual => Routing::Dual,
                    TableKind::Derived => {
                        return Err(internal_err!("table {} is bound to a derived table", info.alias))
                    }
                };
                let source = self.arena.add(Operator::Table(Table {
                    table_id,
                    name: info.name().to_string(),
                    alias: info.alias.clone(),
                }));
                Ok(self.arena.add(Operator::Route(Route::new(source, routing))))
            }
            TableReference::Derived {
                subquery,
                alias,
                binding,
            } => {
                let table_id = binding.ok_or_else(|| internal_err!("unbound derived table {}", alias))?;
                self.build_query(
                    subquery,
                    Some(DerivedInfo {
                        table_id,
                        alias: alias.clone(),
                    }),
                )
            }
            TableReference::Join {
                left,
                right,
                join_type,
                condition,
            } => {
                let (outer, inner, left_join) = match join_type {
                    JoinType::Inner | JoinType::Cross => (left, right, false),
                    JoinType::Left => (left, right, true),
                    JoinType::Right => (right, left, true),
                };
                let lhs = self.build_table_ref(outer)?;
                let rhs = self.build_table_ref(inner)?;
                let id = self.arena.add(Operator::Join(Join {
                    lhs,
                    rhs,
                    predicate: None,
                    left_join,
                }));
                if let Some(condition) = condition {
                    let rhs_tables = self.arena.table_ids(rhs)?;
                    for conjunct in split_conjuncts(condition) {
                        let deps = self.semantics.dependencies(&conjunct);
                        if !left_join {
                            self.place_predicate(id, conjunct)?;
                        } else if !deps.is_empty() && deps.is_subset_of(rhs_tables) {
                            // restricts which inner rows match, never the outer rows
                            self.place_predicate(rhs, conjunct)?;
                        } else {
                            add_join_predicate(self.arena, id, conjunct)?;
                        }
                    }
                }
                Ok(id)
            }
        }
    }

    /// Push a predicate down to the lowest operator that sees every table
    /// it reads
    fn place_predicate(&mut self, id: OpId, predicate: Expression) -> PlannerResult<()> {
        match self.arena.get(id)? {
            Operator::Join(join) => {
                let (lhs, rhs, left_join) = (join.lhs, join.rhs, join.left_join);
                let deps = self.semantics.dependencies(&predicate);
                if deps.is_subset_of(self.arena.table_ids(lhs)?) {
                    self.place_predicate(lhs, predicate)
                } else if !left_join && deps.is_subset_of(self.arena.table_ids(rhs)?) {
                    self.place_predicate(rhs, predicate)
                } else if !left_join {
                    add_join_predicate(self.arena, id, predicate)
                } else {
                    // a WHERE condition on the inner side of a LEFT JOIN
                    // filters null-extended rows too
                    self.arena
                        .wrap(id, |source| Operator::Filter(Filter::new(source, vec![predicate])))
                }
            }
            Operator::Filter(filter) => {
                // a filter over a LEFT JOIN still lets outer-only
                // conditions reach the outer side
                if let Operator::Join(join) = self.arena.get(filter.source)? {
                    let lhs = join.lhs;
                    let deps = self.semantics.dependencies(&predicate);
                    if !deps.is_empty() && deps.is_subset_of(self.arena.table_ids(lhs)?) {
                        return self.place_predicate(lhs, predicate);
                    }
                }
                if let Operator::Filter(filter) = self.arena.get_mut(id)? {
                    filter.predicates.push(predicate);
                }
                Ok(())
            }
            _ => self
                .arena
                .wrap(id, |source| Operator::Filter(Filter::new(source, vec![predicate]))),
        }
    }
}

fn add_join_predicate(arena: &mut PlanArena, id: OpId, predicate: Expression) -> PlannerResult<()> {
    match arena.get_mut(id)? {
        Operator::Join(join) => {
            join.predicate = Some(match join.predicate.take() {
                None => predicate,
                Some(existing) => Expression::binary(existing, BinaryOperator::And, predicate),
            });
            Ok(())
        }
        other => Err(internal_err!("expected Join at {}, found {}", id, other.name())),
    }
}

fn collect_bindings(table: &TableReference, out: &mut Vec<usize>) {
    match table {
        TableReference::Table { binding, .. } | TableReference::Derived { binding, .. } => {
            out.extend(binding.iter().copied())
        }
        TableReference::Join { left, right, .. } => {
            collect_bindings(left, out);
            collect_bindings(right, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::Statement;
    use crate::parser::parse_sql;
    use crate::planner::binder::Binder;
    use crate::schema::VSchema;

    const VSCHEMA: &str = r#"{"keyspaces": {"ks": {"sharded": true,
        "vindexes": {"hash": {"type": "hash"}},
        "tables": {
            "a": {"columns": [{"name": "id"}, {"name": "x"}],
                  "column_vindexes": [{"columns": ["id"], "name": "hash"}]},
            "b": {"columns": [{"name": "id"}, {"name": "y"}],
                  "column_vindexes": [{"columns": ["id"], "name": "hash"}]}
        }}}}"#;

    fn build(sql: &str) -> PlannerResult<(PlanArena, OpId)> {
        let vschema = VSchema::from_json(VSCHEMA)?;
        let query = match parse_sql(sql)? {
            Statement::Query(q) => q,
            Statement::Explain { query, .. } => query,
        };
        let (bound, semantics) = Binder::new(&vschema).bind(&query)?;
        let mut arena = PlanArena::new();
        let root = PlanBuilder::new(&mut arena, &semantics).build(&bound)?;
        Ok((arena, root))
    }

    fn shape(arena: &PlanArena, id: OpId) -> String {
        let op = arena.get(id).unwrap();
        let children: Vec<String> = op.inputs().into_iter().map(|c| shape(arena, c)).collect();
        if children.is_empty() {
            op.name().to_string()
        } else {
            format!("{}({})", op.name(), children.join(", "))
        }
    }

    #[test]
    fn test_predicates_land_on_their_tables() -> PlannerResult<()> {
        let (arena, root) = build("select a.x from a join b on a.id = b.id where a.x = 1 and b.y = 2")?;
        assert_eq!(
            shape(&arena, root),
            "Horizon(Join(Filter(Route(Table)), Filter(Route(Table))))"
        );
        Ok(())
    }

    #[test]
    fn test_left_join_keeps_outer_conditions_in_place() -> PlannerResult<()> {
        let (arena, root) =
            build("select a.x from a left join b on a.id = b.id and b.y = 2 where b.y is null")?;
        assert_eq!(
            shape(&arena, root),
            "Horizon(Filter(Join(Route(Table), Filter(Route(Table)))))"
        );
        Ok(())
    }

    #[test]
    fn test_outer_side_conditions_pass_a_left_join_filter() -> PlannerResult<()> {
        let (arena, root) =
            build("select a.x from a left join b on a.id = b.id where b.y is null and a.x = 1")?;
        assert_eq!(
            shape(&arena, root),
            "Horizon(Filter(Join(Filter(Route(Table)), Route(Table))))"
        );

        // the same plan whatever the conjunct order
        let (arena, root) =
            build("select a.x from a left join b on a.id = b.id where a.x = 1 and b.y is null")?;
        assert_eq!(
            shape(&arena, root),
            "Horizon(Filter(Join(Filter(Route(Table)), Route(Table))))"
        );
        Ok(())
    }

    #[test]
    fn test_right_join_is_mirrored() -> PlannerResult<()> {
        let (arena, root) = build("select a.x from a right join b on a.id = b.id")?;
        let join = arena.get(root)?.inputs()[0];
        match arena.get(join)? {
            Operator::Join(join) => {
                assert!(join.left_join);
                assert_eq!(arena.table_ids(join.lhs)?.iter().collect::<Vec<_>>(), vec![1]);
            }
            other => panic!("expected a join, found {}", other.name()),
        }
        Ok(())
    }

    #[test]
    fn test_union_flattening() -> PlannerResult<()> {
        let (arena, root) = build("select id from a union select id from b union select id from a")?;
        assert_eq!(
            shape(&arena, root),
            "Union(Horizon(Route(Table)), Horizon(Route(Table)), Horizon(Route(Table)))"
        );

        // UNION ALL under UNION DISTINCT can be flattened, not the reverse
        let (arena, root) = build("select id from a union all select id from b union select id from a")?;
        assert_eq!(arena.get(root)?.inputs().len(), 3);
        let (arena, root) = build("select id from a union select id from b union all select id from a")?;
        assert_eq!(arena.get(root)?.inputs().len(), 2);
        Ok(())
    }

    #[test]
    fn test_dual_and_derived_tables() -> PlannerResult<()> {
        let (arena, root) = build("select 1")?;
        assert_eq!(shape(&arena, root), "Horizon(Route(Table))");

        let (arena, root) = build("select d.x from (select x from a) as d where d.x = 3")?;
        assert_eq!(shape(&arena, root), "Horizon(Filter(Horizon(Route(Table))))");
        Ok(())
    }
}
