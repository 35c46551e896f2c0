use pretty_assertions::assert_eq;
use prism_router::planner::{Opcode, Operator};
use prism_router::{
    parse_sql, BindVars, ExplainFormat, PlannedQuery, PlannerConfig, PlannerResult, QueryPlanner,
    Statement, VSchema, Value,
};

const VSCHEMA: &str = include_str!("fixtures/vschema.json");

fn plan_with(sql: &str, config: PlannerConfig, vars: &BindVars) -> PlannerResult<PlannedQuery> {
    let vschema = VSchema::from_json(VSCHEMA)?;
    QueryPlanner::new(&vschema, config).plan_sql(sql, vars)
}

fn plan(sql: &str) -> PlannerResult<PlannedQuery> {
    plan_with(sql, PlannerConfig::default(), &BindVars::new())
}

#[test]
fn test_point_lookup_reaches_one_shard() -> PlannerResult<()> {
    let planned = plan("select name from users where id = 7")?;
    assert!(planned.is_single_route());
    assert_eq!(planned.routes()[0].routing.opcode(), Opcode::EqualUnique);

    let queries = planned.destination_queries()?;
    assert_eq!(queries.len(), 1);
    assert!(queries[0].sql.contains("from users where users.id = 7"), "{}", queries[0].sql);
    Ok(())
}

#[test]
fn test_split_key_picks_the_sub_table() -> PlannerResult<()> {
    let planned = plan("select total from orders where user_id = 3 and day = 10")?;
    let queries = planned.destination_queries()?;
    assert_eq!(queries.len(), 1);
    assert!(queries[0].sql.contains("from orders_2 as orders"), "{}", queries[0].sql);
    Ok(())
}

#[test]
fn test_unknown_split_key_fans_out_within_the_shard() -> PlannerResult<()> {
    let planned = plan("select total from orders where user_id = 3")?;
    assert_eq!(planned.routes()[0].routing.opcode(), Opcode::EqualUnique);

    let queries = planned.destination_queries()?;
    assert_eq!(queries.len(), 4);
    let shard = &queries[0].shard;
    assert!(queries.iter().all(|q| &q.shard == shard));
    for (index, query) in queries.iter().enumerate() {
        let table = format!("from orders_{} as orders", index);
        assert!(query.sql.contains(&table), "{}", query.sql);
    }
    Ok(())
}

#[test]
fn test_disjunction_is_improved_into_an_in_list() -> PlannerResult<()> {
    let sql = "select name from users where id = 1 or id = 2";
    let planned = plan(sql)?;
    assert_eq!(planned.routes()[0].routing.opcode(), Opcode::In);

    let config = PlannerConfig {
        improve_routing: false,
        ..PlannerConfig::default()
    };
    let planned = plan_with(sql, config, &BindVars::new())?;
    assert_eq!(planned.routes()[0].routing.opcode(), Opcode::Scatter);
    Ok(())
}

#[test]
fn test_bind_variables_pick_the_shard() -> PlannerResult<()> {
    let vars = BindVars::from([("uid".to_string(), Value::Integer(7))]);
    let planned = plan_with(
        "select name from users where id = :uid",
        PlannerConfig::default(),
        &vars,
    )?;
    assert_eq!(planned.routes()[0].routing.opcode(), Opcode::EqualUnique);
    // the query keeps the variable, the destination is resolved now
    let query = planned.routes()[0].query.clone().unwrap_or_default();
    assert!(query.contains("users.id = :uid"), "{}", query);
    Ok(())
}

#[test]
fn test_join_to_unsharded_keyspace_runs_per_row() -> PlannerResult<()> {
    let planned = plan(
        "select users.name, region.label from users join region on users.region = region.code \
         where users.id = 1",
    )?;
    let routes = planned.routes();
    assert_eq!(routes.len(), 2);
    assert_eq!(routes[0].routing.opcode(), Opcode::EqualUnique);
    assert_eq!(routes[1].routing.opcode(), Opcode::Unsharded);

    let inner = routes[1].query.clone().unwrap_or_default();
    assert!(inner.contains(":users_region = region.code"), "{}", inner);
    assert!(planned
        .arena
        .operators()
        .any(|(_, op)| matches!(op, Operator::ApplyJoin(_))));
    Ok(())
}

#[test]
fn test_sharded_grouping_merges_partial_groups() -> PlannerResult<()> {
    let planned = plan("select kind, count(*) from events group by kind")?;
    let routes = planned.routes();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].routing.opcode(), Opcode::Scatter);

    let text = planned.explain(ExplainFormat::Text)?;
    assert!(text.starts_with("Aggregate"), "{}", text);
    assert!(text.contains("sum_count"), "{}", text);
    assert!(text.contains("Sort"), "{}", text);
    Ok(())
}

#[test]
fn test_explain_statement_is_planned() -> PlannerResult<()> {
    let statement = parse_sql("explain format=json select name from users where id = 1")?;
    assert!(matches!(
        statement,
        Statement::Explain {
            format: ExplainFormat::Json,
            ..
        }
    ));

    let vschema = VSchema::from_json(VSCHEMA)?;
    let planner = QueryPlanner::new(&vschema, PlannerConfig::default());
    let planned = planner.plan_statement(&statement, &BindVars::new())?;
    let json: serde_json::Value = serde_json::from_str(&planned.explain(ExplainFormat::Json)?)?;
    assert_eq!(json["OperatorType"], "Route");
    assert_eq!(json["Variant"], "EqualUnique");
    assert_eq!(json["Keyspace"], "commerce");
    assert_eq!(json["Destinations"], 1);
    Ok(())
}

#[test]
fn test_rejections_leave_no_plan() {
    let err = plan("select nope from users").unwrap_err();
    assert_eq!(err.kind(), "unknown_column");

    let err = plan("select users.id from users join orders on users.id = orders.user_id where id = 1")
        .unwrap_err();
    assert_eq!(err.kind(), "ambiguous_column");
    assert!(!err.is_internal());
}
