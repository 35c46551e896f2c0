//! End-to-end planning tests

use crate::common::config::PlannerConfig;
use crate::common::error::PlannerResult;
use crate::expression::evaluator::BindVars;
use crate::parser::ast::ExplainFormat;
use crate::planner::logical_plan::{AggregateOpcode, OpId, Operator};
use crate::planner::planner::{PlannedQuery, QueryPlanner};
use crate::planner::routing::Opcode;
use crate::schema::VSchema;
use crate::types::Value;
use pretty_assertions::assert_eq;

const VSCHEMA: &str = r#"{"keyspaces": {
    "main": {
        "sharded": true,
        "shards": ["-40", "40-80", "80-c0", "c0-"],
        "vindexes": {"hash": {"type": "hash"}},
        "tables": {
            "t": {"columns": [{"name": "id"}, {"name": "uid"}, {"name": "name", "type": "varchar"}],
                  "column_vindexes": [{"columns": ["id"], "name": "hash"}],
                  "split": {"columns": ["uid"], "function": "mod", "table_count": 4}},
            "s": {"columns": [{"name": "id"}, {"name": "name", "type": "varchar"}],
                  "column_vindexes": [{"columns": ["id"], "name": "hash"}],
                  "split": {"columns": ["id"], "function": "mod", "table_count": 8}},
            "orders": {"columns": [{"name": "id"}, {"name": "total"}],
                  "column_vindexes": [{"columns": ["id"], "name": "hash"}]},
            "customers": {"columns": [{"name": "id"}, {"name": "name", "type": "varchar"}],
                  "column_vindexes": [{"columns": ["id"], "name": "hash"}]}
        }
    },
    "other": {
        "tables": {"u": {"columns": [{"name": "tid"}, {"name": "val"}]}}
    }
}}"#;

fn plan(sql: &str) -> PlannerResult<PlannedQuery> {
    plan_with(sql, &BindVars::new())
}

fn plan_with(sql: &str, vars: &BindVars) -> PlannerResult<PlannedQuery> {
    let vschema = VSchema::from_json(VSCHEMA)?;
    QueryPlanner::new(&vschema, PlannerConfig::default()).plan_sql(sql, vars)
}

/// Central operator names from the root down to the first route, following
/// single sources
fn central_chain(planned: &PlannedQuery) -> PlannerResult<Vec<&'static str>> {
    let mut names = Vec::new();
    let mut cur = planned.root;
    loop {
        let op = planned.arena.get(cur)?;
        names.push(op.name());
        match op {
            Operator::Route(_) => return Ok(names),
            other => match other.source() {
                Some(source) => cur = source,
                None => return Ok(names),
            },
        }
    }
}

fn skip_projections(planned: &PlannedQuery) -> PlannerResult<OpId> {
    let mut cur = planned.root;
    while let Operator::Projection(p) = planned.arena.get(cur)? {
        cur = p.source;
    }
    Ok(cur)
}

#[test]
fn test_shard_and_split_keys_pick_one_destination() -> PlannerResult<()> {
    let planned = plan("select id from t where id = 5 and uid = 7")?;
    assert!(planned.is_single_route());

    let routes = planned.routes();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].routing.opcode(), Opcode::EqualUnique);
    match &routes[0].routing {
        crate::planner::routing::Routing::Keyspace(ks) => {
            assert_eq!(ks.split_opcodes(), vec![Opcode::EqualUnique]);
        }
        other => panic!("expected keyspace routing, found {}", other.describe()),
    }

    let queries = planned.destination_queries()?;
    assert_eq!(queries.len(), 1);
    assert!(queries[0].sql.contains("from t_3 as t"), "{}", queries[0].sql);
    assert!(queries[0].sql.contains("where t.id = 5 and t.uid = 7"), "{}", queries[0].sql);
    Ok(())
}

#[test]
fn test_bind_variables_route_like_literals() -> PlannerResult<()> {
    let vars = BindVars::from([("v".to_string(), Value::Integer(5))]);
    let planned = plan_with("select id from orders where id = :v", &vars)?;
    assert_eq!(planned.routes()[0].routing.opcode(), Opcode::EqualUnique);

    // not supplied: the predicate cannot be used for routing
    let planned = plan("select id from orders where id = :v")?;
    assert_eq!(planned.routes()[0].routing.opcode(), Opcode::Scatter);
    Ok(())
}

#[test]
fn test_scattered_count_is_split_into_partials() -> PlannerResult<()> {
    let planned = plan("select count(*) from t")?;
    assert_eq!(central_chain(&planned)?, vec!["Aggregator", "Route"]);

    let (aggregator, route) = match planned.arena.get(planned.root)? {
        Operator::Aggregator(a) => (a, a.source),
        other => panic!("expected aggregator, found {}", other.name()),
    };
    assert!(aggregator.original);
    assert_eq!(aggregator.aggregates[0].opcode, AggregateOpcode::SumCount);

    let route = planned.arena.route(route)?;
    assert_eq!(route.routing.opcode(), Opcode::Scatter);
    match planned.arena.get(route.source)? {
        Operator::Aggregator(partial) => {
            assert!(!partial.original);
            assert_eq!(partial.aggregates[0].opcode, AggregateOpcode::CountStar);
        }
        other => panic!("expected partial aggregator, found {}", other.name()),
    }
    assert_eq!(route.query.as_deref(), Some("select count(*) from t"));
    // 4 shards by 4 sub-tables
    assert_eq!(planned.destination_queries()?.len(), 16);
    Ok(())
}

#[test]
fn test_scattered_order_and_limit_merge_sort_with_weight_strings() -> PlannerResult<()> {
    let planned = plan("select name from t order by name limit 5")?;
    assert_eq!(central_chain(&planned)?, vec!["Limit", "Ordering", "Route"]);

    let ordering = match planned.arena.get(planned.root)? {
        Operator::Limit(limit) => limit.source,
        other => panic!("expected limit, found {}", other.name()),
    };
    match planned.arena.get(ordering)? {
        Operator::Ordering(o) => {
            assert!(o.pushed);
            assert_eq!(o.keys[0].offset, Some(0));
            assert_eq!(o.keys[0].ws_offset, Some(1));
        }
        other => panic!("expected ordering, found {}", other.name()),
    }

    let query = planned.routes()[0].query.clone().unwrap_or_default();
    assert!(query.contains("weight_string(t.name)"), "{}", query);
    assert!(query.ends_with("order by t.name asc limit 5"), "{}", query);
    // the helper column is not part of the result
    assert_eq!(planned.columns, vec!["name".to_string()]);
    Ok(())
}

#[test]
fn test_join_on_one_shard_becomes_one_route() -> PlannerResult<()> {
    let planned = plan(
        "select orders.total, customers.name from orders join customers on orders.id = customers.id \
         where orders.id = 5 and customers.id = 5",
    )?;
    assert!(planned.is_single_route());
    let routes = planned.routes();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].routing.opcode(), Opcode::EqualUnique);
    let query = routes[0].query.clone().unwrap_or_default();
    assert!(query.contains("from orders join customers on orders.id = customers.id"), "{}", query);
    Ok(())
}

#[test]
fn test_join_on_shard_key_scatters_together() -> PlannerResult<()> {
    let planned = plan("select orders.total from orders join customers on orders.id = customers.id")?;
    assert!(planned.is_single_route());
    assert_eq!(planned.routes()[0].routing.opcode(), Opcode::Scatter);
    Ok(())
}

#[test]
fn test_cross_keyspace_join_passes_outer_values() -> PlannerResult<()> {
    let planned = plan("select t.name, u.val from t join u on t.id = u.tid")?;
    assert_eq!(planned.routes().len(), 2);

    let join = skip_projections(&planned)?;
    match planned.arena.get(join)? {
        Operator::ApplyJoin(apply) => {
            assert_eq!(apply.vars.len(), 1);
            assert_eq!(apply.vars[0].name, "t_id");
            assert!(apply.vars[0].offset.is_some());
        }
        other => panic!("expected apply join, found {}", other.name()),
    }
    let inner = planned.routes()[1].query.clone().unwrap_or_default();
    assert!(inner.contains(":t_id = u.tid"), "{}", inner);
    Ok(())
}

#[test]
fn test_union_of_unmergeable_routes_keeps_distinct_central() -> PlannerResult<()> {
    let planned = plan("select distinct name from t union select name from s")?;
    let union = match planned.arena.get(planned.root)? {
        Operator::Distinct(distinct) => distinct.source,
        other => panic!("expected distinct, found {}", other.name()),
    };
    match planned.arena.get(union)? {
        Operator::Union(union) => {
            assert!(!union.distinct);
            assert_eq!(union.inputs.len(), 2);
            for input in &union.inputs {
                assert_eq!(planned.arena.get(*input)?.name(), "Route");
            }
        }
        other => panic!("expected union, found {}", other.name()),
    }
    Ok(())
}

#[test]
fn test_union_on_one_shard_merges() -> PlannerResult<()> {
    let planned = plan("select id from orders where id = 1 union all select id from customers where id = 1")?;
    assert!(planned.is_single_route());
    let query = planned.routes()[0].query.clone().unwrap_or_default();
    assert!(query.contains(" union all "), "{}", query);
    Ok(())
}

#[test]
fn test_grouping_by_shard_key_goes_down_whole() -> PlannerResult<()> {
    let planned = plan("select id, count(*) from orders group by id")?;
    assert!(planned.is_single_route());
    let query = planned.routes()[0].query.clone().unwrap_or_default();
    assert!(query.contains("group by orders.id"), "{}", query);
    Ok(())
}

#[test]
fn test_avg_is_computed_from_partial_sums() -> PlannerResult<()> {
    let planned = plan("select avg(total) from orders")?;
    match planned.arena.get(skip_projections(&planned)?)? {
        Operator::Aggregator(a) => {
            assert_eq!(a.aggregates[0].opcode, AggregateOpcode::AvgOfPartials);
        }
        other => panic!("expected aggregator, found {}", other.name()),
    }
    let query = planned.routes()[0].query.clone().unwrap_or_default();
    assert!(query.contains("sum(orders.total)"), "{}", query);
    assert!(query.contains("count(orders.total)"), "{}", query);
    Ok(())
}

#[test]
fn test_impossible_predicate_routes_nowhere() -> PlannerResult<()> {
    let planned = plan("select id from orders where id = null")?;
    assert_eq!(planned.routes()[0].routing.opcode(), Opcode::None);
    assert!(planned.destination_queries()?.is_empty());
    Ok(())
}

#[test]
fn test_scalar_aggregate_over_no_destination_still_returns_a_row() -> PlannerResult<()> {
    for sql in [
        "select count(*) from orders where 1 = 0",
        "select count(*) from orders where id = null",
        "select count(*) from t where id = null",
    ] {
        let planned = plan(sql)?;
        assert!(!planned.is_single_route(), "{}", sql);

        let route = match planned.arena.get(skip_projections(&planned)?)? {
            Operator::Aggregator(central) => {
                assert!(central.original, "{}", sql);
                assert_eq!(central.aggregates[0].opcode, AggregateOpcode::SumCount, "{}", sql);
                central.source
            }
            other => panic!("{}: expected aggregator, found {}", sql, other.name()),
        };
        let route = planned.arena.route(route)?;
        assert_eq!(route.routing.opcode(), Opcode::None, "{}", sql);
        match planned.arena.get(route.source)? {
            Operator::Aggregator(partial) => assert!(!partial.original, "{}", sql),
            other => panic!("{}: expected partial aggregator, found {}", sql, other.name()),
        }
        assert!(planned.destination_queries()?.is_empty(), "{}", sql);
    }
    Ok(())
}

#[test]
fn test_grouped_aggregate_over_no_destination_goes_down_whole() -> PlannerResult<()> {
    // no rows means no groups, so nothing is owed centrally
    let planned = plan("select id, count(*) from orders where id = null group by id")?;
    assert!(planned.is_single_route());
    assert_eq!(planned.routes()[0].routing.opcode(), Opcode::None);
    Ok(())
}

#[test]
fn test_limited_inner_side_is_swapped_to_the_outside() -> PlannerResult<()> {
    let planned =
        plan("select o.id from orders o join (select id from t limit 3) d on d.id = o.total")?;
    match planned.arena.get(skip_projections(&planned)?)? {
        Operator::ApplyJoin(apply) => {
            assert!(!apply.left_join);
            assert!(planned.arena.has_central_limit(apply.lhs)?);
            assert!(!planned.arena.has_central_limit(apply.rhs)?);
            assert_eq!(apply.vars.len(), 1);
        }
        other => panic!("expected apply join, found {}", other.name()),
    }
    Ok(())
}

#[test]
fn test_limited_inner_side_that_cannot_swap_is_rejected() {
    let err = plan(
        "select o.id from orders o left join (select id from t limit 3) d on d.id = o.total",
    )
    .unwrap_err();
    assert_eq!(err.kind(), "unsupported");

    let err = plan(
        "select o.id from (select id, total from orders limit 2) o \
         join (select id from t limit 3) d on d.id = o.total",
    )
    .unwrap_err();
    assert_eq!(err.kind(), "unsupported");
}

#[test]
fn test_errors_are_classified() {
    let err = plan("select id from t join s on t.id = s.id").unwrap_err();
    assert_eq!(err.kind(), "ambiguous_column");

    let err = plan("select avg(distinct uid) from t").unwrap_err();
    assert_eq!(err.kind(), "unsupported");

    let err = plan("select id from nowhere").unwrap_err();
    assert_eq!(err.kind(), "unknown_table");
}

#[test]
fn test_explain_formats() -> PlannerResult<()> {
    let planned = plan("select count(*) from t")?;
    let text = planned.explain(ExplainFormat::Text)?;
    assert!(text.starts_with("Aggregate"), "{}", text);
    assert!(text.contains("\n  Route"), "{}", text);

    let json: serde_json::Value = serde_json::from_str(&planned.explain(ExplainFormat::Json)?)?;
    assert_eq!(json["OperatorType"], "Aggregate");
    assert_eq!(json["Inputs"][0]["Variant"], "Scatter");
    assert_eq!(json["Inputs"][0]["Keyspace"], "main");
    Ok(())
}
