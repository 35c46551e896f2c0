use criterion::{criterion_group, criterion_main, Criterion};
use prism_router::{parse_sql, BindVars, PlannerConfig, QueryPlanner, VSchema};
use std::hint::black_box;

const VSCHEMA: &str = include_str!("../tests/fixtures/vschema.json");

const QUERIES: &[(&str, &str)] = &[
    ("point_lookup", "select name from users where id = 7"),
    (
        "split_lookup",
        "select total from orders where user_id = 3 and day = 10",
    ),
    (
        "scatter_aggregate",
        "select kind, count(*), max(user_id) from events group by kind order by kind limit 10",
    ),
    (
        "cross_keyspace_join",
        "select users.name, region.label from users join region on users.region = region.code",
    ),
    (
        "union_distinct",
        "select user_id from orders union select user_id from events",
    ),
];

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for (name, sql) in QUERIES {
        group.bench_function(*name, |b| b.iter(|| parse_sql(black_box(sql))));
    }
    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let vschema = VSchema::from_json(VSCHEMA).expect("fixture vschema");
    let planner = QueryPlanner::new(&vschema, PlannerConfig::default());
    let vars = BindVars::new();

    let mut group = c.benchmark_group("plan");
    for (name, sql) in QUERIES {
        let statement = parse_sql(sql).expect("benchmark query parses");
        group.bench_function(*name, |b| {
            b.iter(|| planner.plan_statement(black_box(&statement), &vars))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_plan);
criterion_main!(benches);
