//! Plan descriptions
//!
//! A finished plan is described as a tree of operator entries. The same
//! description renders as an indented text tree or as JSON.

use crate::common::error::PlannerResult;
use crate::planner::logical_plan::*;
use crate::planner::routing::Routing;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt::Write;

/// One operator of a described plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanDescription {
    #[serde(rename = "OperatorType")]
    pub operator_type: String,
    #[serde(flatten)]
    pub details: BTreeMap<String, JsonValue>,
    #[serde(rename = "Inputs", skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<PlanDescription>,
}

impl PlanDescription {
    fn new(operator_type: &str) -> Self {
        Self {
            operator_type: operator_type.to_string(),
            details: BTreeMap::new(),
            inputs: vec![],
        }
    }

    fn detail(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Describe the plan rooted at `root`
    pub fn of(arena: &PlanArena, root: OpId) -> PlannerResult<Self> {
        let op = arena.get(root)?;
        let mut description = describe(op);
        if !matches!(op, Operator::Route(_)) {
            for input in op.inputs() {
                description.inputs.push(Self::of(arena, input)?);
            }
        }
        Ok(description)
    }

    pub fn to_json(&self) -> PlannerResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        self.write_text(0, &mut out);
        out
    }

    fn write_text(&self, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        let _ = write!(out, "{}{}", indent, self.operator_type);
        for (key, value) in &self.details {
            let rendered = match value {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            let _ = write!(out, " {}={}", key, rendered);
        }
        out.push('\n');
        for input in &self.inputs {
            input.write_text(depth + 1, out);
        }
    }
}

fn expressions(exprs: impl IntoIterator<Item = impl ToString>) -> JsonValue {
    JsonValue::Array(
        exprs
            .into_iter()
            .map(|e| JsonValue::String(e.to_string()))
            .collect(),
    )
}

fn offset(offset: Option<usize>, ws_offset: Option<usize>) -> String {
    let base = offset.map(|o| o.to_string()).unwrap_or_else(|| "?".to_string());
    match ws_offset {
        Some(ws) => format!("({}|{})", base, ws),
        None => base,
    }
}

fn describe(op: &Operator) -> PlanDescription {
    match op {
        Operator::Route(route) => describe_route(route),
        Operator::Aggregator(aggregator) => {
            let mut d = PlanDescription::new("Aggregate")
                .detail("Variant", if aggregator.grouping.is_empty() { "Scalar" } else { "Ordered" });
            let aggregates: Vec<String> = aggregator
                .aggregates
                .iter()
                .map(|a| {
                    let inputs: Vec<String> = a.input_offsets.iter().map(|o| o.to_string()).collect();
                    let mut text = format!("{}({})", a.opcode.name(), inputs.join(","));
                    if let Some(alias) = &a.alias {
                        let _ = write!(text, " as {}", alias);
                    }
                    text
                })
                .collect();
            if !aggregates.is_empty() {
                d = d.detail("Aggregates", expressions(aggregates));
            }
            if !aggregator.grouping.is_empty() {
                d = d.detail(
                    "GroupBy",
                    expressions(aggregator.grouping.iter().map(|g| offset(g.offset, g.ws_offset))),
                );
            }
            d
        }
        Operator::Ordering(ordering) => PlanDescription::new("Sort")
            .detail("Variant", if ordering.pushed { "Merge" } else { "Memory" })
            .detail(
                "OrderBy",
                expressions(ordering.keys.iter().map(|k| {
                    format!(
                        "{} {}",
                        offset(k.offset, k.ws_offset),
                        if k.ascending { "ASC" } else { "DESC" }
                    )
                })),
            ),
        Operator::Limit(limit) => {
            let d = PlanDescription::new("Limit").detail("Count", limit.count);
            match limit.offset {
                Some(offset) => d.detail("Offset", offset),
                None => d,
            }
        }
        Operator::Distinct(distinct) => PlanDescription::new("Distinct").detail(
            "Collations",
            expressions(distinct.columns.iter().map(|c| offset(Some(c.offset), c.ws_offset))),
        ),
        Operator::Projection(projection) => {
            let columns = projection.columns.iter().map(|c| {
                let value = c.eval.as_ref().unwrap_or(&c.expr);
                format!("{} as {}", value, c.alias)
            });
            PlanDescription::new("Projection").detail("Expressions", expressions(columns))
        }
        Operator::Filter(filter) => {
            let predicate = filter
                .bound
                .clone()
                .or_else(|| crate::expression::predicates::and_all(filter.predicates.clone()));
            PlanDescription::new("Filter").detail(
                "Predicate",
                predicate.map(|p| p.to_string()).unwrap_or_default(),
            )
        }
        Operator::ApplyJoin(join) => {
            let mut d = PlanDescription::new("Join")
                .detail("Variant", if join.left_join { "LeftJoin" } else { "Join" })
                .detail(
                    "JoinColumnIndexes",
                    join.columns
                        .iter()
                        .map(|c| format!("{}:{}", if c.from_lhs { "L" } else { "R" }, c.offset))
                        .collect::<Vec<_>>()
                        .join(","),
                );
            if !join.vars.is_empty() {
                let vars: BTreeMap<String, JsonValue> = join
                    .vars
                    .iter()
                    .map(|v| (v.name.clone(), json!(offset(v.offset, None))))
                    .collect();
                d = d.detail("JoinVars", JsonValue::Object(vars.into_iter().collect()));
            }
            if let Some(predicate) = &join.predicate {
                d = d.detail("Predicate", predicate.to_string());
            }
            d
        }
        Operator::Union(union) => PlanDescription::new("Concatenate")
            .detail("Distinct", union.distinct),
        other => PlanDescription::new(other.name()),
    }
}

fn describe_route(route: &Route) -> PlanDescription {
    let mut d = PlanDescription::new("Route").detail("Variant", route.routing.opcode().to_string());
    if let Routing::Keyspace(ks) = &route.routing {
        d = d.detail("Keyspace", ks.keyspace.name.clone());
        let values = ks.shard_values();
        if !values.is_empty() {
            let rows: Vec<JsonValue> = values
                .iter()
                .map(|row| match row.as_slice() {
                    [single] => json!(single.to_string()),
                    many => expressions(many.iter()),
                })
                .collect();
            d = d.detail("Values", JsonValue::Array(rows));
        }
        let splits = ks.split_opcodes();
        if !splits.is_empty() {
            d = d.detail("SplitVariants", expressions(splits.iter()));
        }
        d = d.detail("Destinations", ks.destinations().len());
    }
    if let Some(query) = &route.query {
        d = d.detail("Query", query.clone());
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::{ColumnName, Expression};
    use pretty_assertions::assert_eq;

    fn sample() -> (PlanArena, OpId) {
        let mut arena = PlanArena::new();
        let table = arena.add(Operator::Table(Table {
            table_id: 0,
            name: "dual".to_string(),
            alias: "dual".to_string(),
        }));
        let mut route = Route::new(table, Routing::Dual);
        route.query = Some("select 1 from dual".to_string());
        let route = arena.add(Operator::Route(route));
        let ordering = arena.add(Operator::Ordering(Ordering {
            source: route,
            keys: vec![RouteOrdering {
                expr: Expression::Column(ColumnName::bound("t", "a", 0)),
                ascending: true,
                offset: Some(0),
                ws_offset: Some(1),
            }],
            pushed: true,
        }));
        let limit = arena.add(Operator::Limit(Limit {
            source: ordering,
            count: 5,
            offset: None,
            pushed: true,
        }));
        (arena, limit)
    }

    #[test]
    fn test_text_tree() -> PlannerResult<()> {
        let (arena, root) = sample();
        let text = PlanDescription::of(&arena, root)?.to_text();
        assert_eq!(
            text,
            "Limit Count=5\n  Sort OrderBy=[\"(0|1) ASC\"] Variant=Merge\n    Route Query=select 1 from dual Variant=Dual\n"
        );
        Ok(())
    }

    #[test]
    fn test_json_shape() -> PlannerResult<()> {
        let (arena, root) = sample();
        let json: JsonValue = serde_json::from_str(&PlanDescription::of(&arena, root)?.to_json()?)?;
        assert_eq!(json["OperatorType"], "Limit");
        assert_eq!(json["Inputs"][0]["OrderBy"][0], "(0|1) ASC");
        assert_eq!(json["Inputs"][0]["Inputs"][0]["Variant"], "Dual");
        assert!(json["Inputs"][0]["Inputs"][0].get("Inputs").is_none());
        Ok(())
    }
}
