//! Routing
//!
//! How a route reaches its data. Every table brings partition-key
//! candidates: its vindexes (which shard) and its split key (which sub-table
//! inside the shard). Predicates found while planning add options to the
//! candidates, and the cheapest ready option decides the route's opcode.

use crate::common::config::PlannerConfig;
use crate::expression::evaluator::StaticEvaluator;
use crate::expression::predicates::{or_to_in, split_conjuncts, to_cnf};
use crate::parser::ast::{BinaryOperator, ColumnName, Expression};
use crate::schema::{Keyspace, ResolvedTable, SplitDef, Vindex};
use crate::types::Value;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Routing strategies, cheapest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Opcode {
    /// Statically empty result
    None,
    /// Constant row, no table access
    Dual,
    /// The single shard of an unsharded keyspace
    Unsharded,
    EqualUnique,
    MultiEqual,
    In,
    Scatter,
}

impl Opcode {
    pub fn cost(&self) -> u8 {
        match self {
            Opcode::None => 0,
            Opcode::Dual | Opcode::Unsharded => 1,
            Opcode::EqualUnique => 2,
            Opcode::MultiEqual => 3,
            Opcode::In => 4,
            Opcode::Scatter => 5,
        }
    }

    /// At most one destination
    pub fn is_single(&self) -> bool {
        matches!(
            self,
            Opcode::None | Opcode::Dual | Opcode::Unsharded | Opcode::EqualUnique
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::None => "None",
            Opcode::Dual => "Dual",
            Opcode::Unsharded => "Unsharded",
            Opcode::EqualUnique => "EqualUnique",
            Opcode::MultiEqual => "MultiEqual",
            Opcode::In => "IN",
            Opcode::Scatter => "Scatter",
        };
        write!(f, "{}", name)
    }
}

/// Function mapping partition-key values to a destination
#[derive(Debug, Clone, PartialEq)]
pub enum KeyFunction {
    Vindex(Vindex),
    Split(SplitDef),
}

impl KeyFunction {
    /// Two keys hashed the same way send equal values to the same place
    pub fn compatible(&self, other: &KeyFunction) -> bool {
        match (self, other) {
            (KeyFunction::Vindex(a), KeyFunction::Vindex(b)) => a.kind == b.kind,
            (KeyFunction::Split(a), KeyFunction::Split(b)) => {
                a.function == b.function
                    && a.table_count == b.table_count
                    && a.columns.len() == b.columns.len()
            }
            _ => false,
        }
    }
}

/// A way to reach a candidate's data, learned from predicates
#[derive(Debug, Clone, PartialEq)]
pub struct KeyOption {
    pub opcode: Opcode,
    /// Key value rows, one per destination key
    pub values: Vec<Vec<Value>>,
    /// Column values collected so far for a composite key
    pub partial: Vec<Option<Value>>,
    pub predicates: Vec<Expression>,
    pub ready: bool,
}

/// A partition key of one table and the options found for it
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCandidate {
    pub table_id: usize,
    pub columns: Vec<String>,
    pub function: KeyFunction,
    pub options: Vec<KeyOption>,
    /// The table is the inner side of a LEFT JOIN: its predicates do not
    /// restrict which rows the route returns
    pub outer: bool,
}

impl KeyCandidate {
    fn new(table_id: usize, columns: Vec<String>, function: KeyFunction) -> Self {
        Self {
            table_id,
            columns,
            function,
            options: vec![],
            outer: false,
        }
    }

    /// Lowest-cost ready option; the earliest one wins ties
    pub fn best(&self) -> Option<&KeyOption> {
        let mut best: Option<&KeyOption> = None;
        for option in self.options.iter().filter(|o| o.ready) {
            if best.map(|b| option.opcode.cost() < b.opcode.cost()).unwrap_or(true) {
                best = Some(option);
            }
        }
        best
    }

    fn position(&self, column: &ColumnName) -> Option<usize> {
        if column.binding != Some(self.table_id) {
            return None;
        }
        self.columns.iter().position(|c| *c == column.name)
    }

    fn add_rows(&mut self, mut rows: Vec<Vec<Value>>, predicate: &Expression) {
        let mut unique: Vec<Vec<Value>> = Vec::with_capacity(rows.len());
        for row in rows.drain(..) {
            if !unique.contains(&row) {
                unique.push(row);
            }
        }
        let opcode = match unique.len() {
            0 => Opcode::None,
            1 => Opcode::EqualUnique,
            _ if self.columns.len() > 1 => Opcode::MultiEqual,
            _ => Opcode::In,
        };
        self.options.push(KeyOption {
            opcode,
            values: unique,
            partial: vec![],
            predicates: vec![predicate.clone()],
            ready: true,
        });
    }

    /// One column of a composite key is known; the option becomes ready
    /// once every column is
    fn add_partial(&mut self, position: usize, value: Value, predicate: &Expression) {
        let width = self.columns.len();
        let open = self
            .options
            .iter()
            .position(|o| !o.ready && o.partial.get(position) == Some(&None));
        let index = match open {
            Some(index) => index,
            None => {
                self.options.push(KeyOption {
                    opcode: Opcode::EqualUnique,
                    values: vec![],
                    partial: vec![None; width],
                    predicates: vec![],
                    ready: false,
                });
                self.options.len() - 1
            }
        };
        let option = &mut self.options[index];
        option.partial[position] = Some(value);
        option.predicates.push(predicate.clone());
        if option.partial.iter().all(Option::is_some) {
            option.values = vec![option.partial.iter().flatten().cloned().collect()];
            option.ready = true;
        }
    }
}

fn best_of(candidates: &[KeyCandidate]) -> Option<(&KeyCandidate, &KeyOption)> {
    let mut best: Option<(&KeyCandidate, &KeyOption)> = None;
    for candidate in candidates.iter().filter(|c| !c.outer) {
        if let Some(option) = candidate.best() {
            if best
                .map(|(_, b)| option.opcode.cost() < b.opcode.cost())
                .unwrap_or(true)
            {
                best = Some((candidate, option));
            }
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitTable {
    pub table_id: usize,
    pub name: String,
}

/// Split tables whose sub-table index moves in lockstep
#[derive(Debug, Clone, PartialEq)]
pub struct SplitGroup {
    pub tables: Vec<SplitTable>,
    pub table_count: usize,
    pub candidates: Vec<KeyCandidate>,
}

impl SplitGroup {
    pub fn opcode(&self, impossible: bool) -> Opcode {
        if impossible {
            return Opcode::None;
        }
        best_of(&self.candidates)
            .map(|(_, option)| option.opcode)
            .unwrap_or(Opcode::Scatter)
    }

    /// Sub-table indexes the group reaches
    pub fn targets(&self, impossible: bool) -> Vec<usize> {
        match self.opcode(impossible) {
            Opcode::None => vec![],
            Opcode::Scatter => (0..self.table_count).collect(),
            _ => {
                let mut indexes = Vec::new();
                if let Some((candidate, option)) = best_of(&self.candidates) {
                    if let KeyFunction::Split(split) = &candidate.function {
                        for row in &option.values {
                            if let Some(index) = split.sub_table(row) {
                                if !indexes.contains(&index) {
                                    indexes.push(index);
                                }
                            }
                        }
                    }
                }
                indexes.sort_unstable();
                indexes
            }
        }
    }
}

/// One physical destination: a shard plus the sub-table each split table
/// maps to there
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    pub shard: String,
    pub tables: BTreeMap<usize, String>,
}

/// Routing state of a route reading keyspace tables
#[derive(Debug, Clone)]
pub struct KeyspaceRouting {
    pub keyspace: Arc<Keyspace>,
    pub shard_keys: Vec<KeyCandidate>,
    pub splits: Vec<SplitGroup>,
    /// Predicates already folded in
    pub seen: Vec<Expression>,
    /// A predicate is statically false
    pub impossible: bool,
}

impl KeyspaceRouting {
    pub fn for_table(table_id: usize, resolved: &ResolvedTable) -> Self {
        let table = &resolved.table;
        let shard_keys = table
            .column_vindexes
            .iter()
            .map(|cv| {
                KeyCandidate::new(
                    table_id,
                    cv.columns.clone(),
                    KeyFunction::Vindex(cv.vindex.clone()),
                )
            })
            .collect();
        let splits = table
            .split
            .iter()
            .map(|split| SplitGroup {
                tables: vec![SplitTable {
                    table_id,
                    name: table.name.clone(),
                }],
                table_count: split.table_count,
                candidates: vec![KeyCandidate::new(
                    table_id,
                    split.columns.clone(),
                    KeyFunction::Split(split.clone()),
                )],
            })
            .collect();
        Self {
            keyspace: resolved.keyspace.clone(),
            shard_keys,
            splits,
            seen: vec![],
            impossible: false,
        }
    }

    /// Shard-axis opcode
    pub fn opcode(&self) -> Opcode {
        if self.impossible {
            Opcode::None
        } else if !self.keyspace.sharded {
            Opcode::Unsharded
        } else {
            best_of(&self.shard_keys)
                .map(|(_, option)| option.opcode)
                .unwrap_or(Opcode::Scatter)
        }
    }

    pub fn split_opcodes(&self) -> Vec<Opcode> {
        self.splits
            .iter()
            .map(|g| g.opcode(self.impossible))
            .collect()
    }

    pub fn is_single(&self) -> bool {
        self.opcode().is_single()
            && self
                .split_opcodes()
                .iter()
                .all(|op| matches!(op, Opcode::None | Opcode::EqualUnique))
    }

    /// Shard-axis cost first, then the most expensive split group
    pub fn cost(&self) -> (u8, u8) {
        let split = self
            .split_opcodes()
            .iter()
            .map(Opcode::cost)
            .max()
            .unwrap_or(0);
        (self.opcode().cost(), split)
    }

    /// Number of sub-table combinations per shard
    pub fn fan_out(&self) -> usize {
        self.splits.iter().map(|g| g.table_count).product()
    }

    /// Values of the shard-axis option in use
    pub fn shard_values(&self) -> Vec<Vec<Value>> {
        if self.impossible {
            return vec![];
        }
        best_of(&self.shard_keys)
            .map(|(_, option)| option.values.clone())
            .unwrap_or_default()
    }

    fn candidates_mut(&mut self) -> impl Iterator<Item = &mut KeyCandidate> {
        self.shard_keys
            .iter_mut()
            .chain(self.splits.iter_mut().flat_map(|g| g.candidates.iter_mut()))
            .filter(|c| !c.outer)
    }

    /// Fold one predicate into the routing
    pub fn update(&mut self, predicate: &Expression, evaluator: &StaticEvaluator<'_>) {
        self.seen.push(predicate.clone());
        self.fold(predicate, predicate, evaluator);
    }

    fn fold(&mut self, expr: &Expression, source: &Expression, evaluator: &StaticEvaluator<'_>) {
        if expr.is_constant() {
            if let Some(value) = evaluator.evaluate(expr) {
                if value.as_bool() != Some(true) {
                    self.impossible = true;
                }
            }
            return;
        }
        match expr {
            Expression::Binary {
                left,
                operator: BinaryOperator::And,
                right,
            } => {
                self.fold(left, source, evaluator);
                self.fold(right, source, evaluator);
            }
            Expression::Binary {
                left,
                operator: BinaryOperator::Equals,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (Expression::Tuple(_), Expression::Tuple(_)) => {
                    self.fold_tuple_in(left, std::slice::from_ref(right), source, evaluator)
                }
                (Expression::Column(col), value) | (value, Expression::Column(col))
                    if value.is_constant() =>
                {
                    if let Some(value) = evaluator.evaluate(value) {
                        self.fold_equality(col, value, false, source);
                    }
                }
                _ => {}
            },
            Expression::InList {
                expression,
                list,
                negated: false,
            } => match expression.as_ref() {
                Expression::Column(col) => self.fold_in(col, list, source, evaluator),
                Expression::Tuple(_) => self.fold_tuple_in(expression, list, source, evaluator),
                _ => {}
            },
            Expression::IsNull {
                expression,
                negated: false,
            } => {
                if let Expression::Column(col) = expression.as_ref() {
                    self.fold_equality(col, Value::Null, true, source);
                }
            }
            _ => {}
        }
    }

    /// `col = value`. A NULL value matches nothing, except through
    /// `IS NULL`, which routes to the NULL key like an ordinary value.
    fn fold_equality(&mut self, col: &ColumnName, value: Value, null_safe: bool, source: &Expression) {
        for candidate in self.candidates_mut() {
            let position = match candidate.position(col) {
                Some(position) => position,
                None => continue,
            };
            if value.is_null() && !null_safe {
                candidate.add_rows(vec![], source);
            } else if candidate.columns.len() == 1 {
                candidate.add_rows(vec![vec![value.clone()]], source);
            } else {
                candidate.add_partial(position, value.clone(), source);
            }
        }
    }

    fn fold_in(
        &mut self,
        col: &ColumnName,
        list: &[Expression],
        source: &Expression,
        evaluator: &StaticEvaluator<'_>,
    ) {
        let mut values = Vec::with_capacity(list.len());
        for item in list {
            match evaluator.evaluate(item) {
                Some(Value::Null) => {}
                Some(value) => values.push(value),
                None => return,
            }
        }
        for candidate in self.candidates_mut() {
            if candidate.columns.len() == 1 && candidate.position(col).is_some() {
                candidate.add_rows(values.iter().map(|v| vec![v.clone()]).collect(), source);
            }
        }
    }

    /// `(a, b) IN ((1, 2), (3, 4))`, walked positionally through nested
    /// tuples
    fn fold_tuple_in(
        &mut self,
        tuple: &Expression,
        list: &[Expression],
        source: &Expression,
        evaluator: &StaticEvaluator<'_>,
    ) {
        let mut targets = Vec::new();
        flatten(tuple, &mut targets);

        let mut rows = Vec::with_capacity(list.len());
        for item in list {
            let mut parts = Vec::new();
            flatten(item, &mut parts);
            if parts.len() != targets.len() {
                return;
            }
            let mut row = Vec::with_capacity(parts.len());
            for part in parts {
                match evaluator.evaluate(part) {
                    Some(value) => row.push(value),
                    None => return,
                }
            }
            rows.push(row);
        }

        for candidate in self.candidates_mut() {
            let positions: Option<Vec<usize>> = candidate
                .columns
                .iter()
                .map(|name| {
                    targets.iter().position(|t| match t {
                        Expression::Column(col) => {
                            col.binding == Some(candidate.table_id) && col.name == *name
                        }
                        _ => false,
                    })
                })
                .collect();
            let positions = match positions {
                Some(p) => p,
                None => continue,
            };
            let key_rows: Vec<Vec<Value>> = rows
                .iter()
                .map(|row| positions.iter().map(|p| row[*p].clone()).collect::<Vec<_>>())
                .filter(|row: &Vec<Value>| !row.iter().any(Value::is_null))
                .collect();
            candidate.add_rows(key_rows, source);
        }
    }

    /// Same candidates with everything learned from predicates dropped
    fn reset(&self) -> Self {
        let mut fresh = self.clone();
        fresh.seen.clear();
        fresh.impossible = false;
        for candidate in fresh.candidates_mut() {
            candidate.options.clear();
        }
        fresh
    }

    /// Second chance for a scattered route: re-fold the predicates seen so
    /// far in conjunctive normal form, then with top-level ORs turned into
    /// IN-lists. Returns the improved routing, if either stage helped.
    pub fn improve(
        &self,
        config: &PlannerConfig,
        evaluator: &StaticEvaluator<'_>,
    ) -> Option<KeyspaceRouting> {
        let scattered = self.opcode() == Opcode::Scatter
            || self.split_opcodes().contains(&Opcode::Scatter);
        if !config.improve_routing || self.impossible || self.seen.is_empty() || !scattered {
            return None;
        }
        let current = self.cost();

        let mut conjuncts = Vec::new();
        for predicate in &self.seen {
            let rewritten = match to_cnf(predicate, config.max_cnf_clauses) {
                Some(cnf) => cnf,
                None => {
                    tracing::warn!(
                        predicate = %predicate,
                        limit = config.max_cnf_clauses,
                        "predicate too large for CNF rewrite"
                    );
                    predicate.clone()
                }
            };
            conjuncts.extend(split_conjuncts(&rewritten));
        }

        let mut cnf = self.reset();
        for conjunct in &conjuncts {
            cnf.update(conjunct, evaluator);
        }
        if cnf.cost() < current {
            tracing::trace!(opcode = %cnf.opcode(), "routing improved by CNF rewrite");
            return Some(cnf);
        }

        let mut folded = self.reset();
        for conjunct in &conjuncts {
            let conjunct = or_to_in(conjunct).unwrap_or_else(|| conjunct.clone());
            folded.update(&conjunct, evaluator);
        }
        if folded.cost() < current {
            tracing::trace!(opcode = %folded.opcode(), "routing improved by OR-to-IN rewrite");
            return Some(folded);
        }
        None
    }

    /// Whether grouping on `grouping` keeps every group on one destination
    pub fn covers_keys(&self, grouping: &[Expression]) -> bool {
        let grouped = |candidate: &KeyCandidate| {
            candidate.columns.iter().all(|name| {
                grouping.iter().any(|g| match g {
                    Expression::Column(col) => {
                        col.binding == Some(candidate.table_id) && col.name == *name
                    }
                    _ => false,
                })
            })
        };
        let shard = !self.keyspace.sharded
            || self.opcode().is_single()
            || self.shard_keys.iter().any(|c| !c.outer && grouped(c));
        shard
            && self.splits.iter().all(|g| {
                matches!(g.opcode(self.impossible), Opcode::None | Opcode::EqualUnique)
                    || g.candidates.iter().any(|c| grouped(c))
            })
    }

    /// Shards the route reaches
    pub fn shard_targets(&self) -> Vec<String> {
        match self.opcode() {
            Opcode::None => vec![],
            Opcode::Unsharded | Opcode::Scatter | Opcode::Dual => self.keyspace.shard_names(),
            _ => {
                let mut shards = Vec::new();
                if let Some((candidate, option)) = best_of(&self.shard_keys) {
                    if let KeyFunction::Vindex(vindex) = &candidate.function {
                        for row in &option.values {
                            let shard = vindex
                                .keyspace_id(row)
                                .and_then(|id| self.keyspace.shard_for(&id).map(|s| s.name.clone()));
                            if let Some(shard) = shard {
                                if !shards.contains(&shard) {
                                    shards.push(shard);
                                }
                            }
                        }
                    }
                }
                // keep keyspace order
                self.keyspace
                    .shard_names()
                    .into_iter()
                    .filter(|s| shards.contains(s))
                    .collect()
            }
        }
    }

    /// Every shard / sub-table combination the route runs against
    pub fn destinations(&self) -> Vec<Destination> {
        let mut result: Vec<Destination> = self
            .shard_targets()
            .into_iter()
            .map(|shard| Destination {
                shard,
                tables: BTreeMap::new(),
            })
            .collect();
        for group in &self.splits {
            let indexes = group.targets(self.impossible);
            let mut expanded = Vec::with_capacity(result.len() * indexes.len());
            for destination in &result {
                for index in &indexes {
                    let mut next = destination.clone();
                    for table in &group.tables {
                        next.tables
                            .insert(table.table_id, SplitDef::physical_name(&table.name, *index));
                    }
                    expanded.push(next);
                }
            }
            result = expanded;
        }
        result
    }
}

/// Leaves of a (possibly nested) tuple in positional order
fn flatten<'a>(expr: &'a Expression, out: &mut Vec<&'a Expression>) {
    match expr {
        Expression::Tuple(items) => {
            for item in items {
                flatten(item, out);
            }
        }
        other => out.push(other),
    }
}

/// Routing of a route operator
#[derive(Debug, Clone)]
pub enum Routing {
    /// Reads no table; answered anywhere
    Dual,
    Keyspace(KeyspaceRouting),
}

impl Routing {
    pub fn for_table(table_id: usize, resolved: &ResolvedTable) -> Self {
        Routing::Keyspace(KeyspaceRouting::for_table(table_id, resolved))
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Routing::Dual => Opcode::Dual,
            Routing::Keyspace(ks) => ks.opcode(),
        }
    }

    pub fn is_single(&self) -> bool {
        match self {
            Routing::Dual => true,
            Routing::Keyspace(ks) => ks.is_single(),
        }
    }

    /// No destination can return a row
    pub fn reaches_nothing(&self) -> bool {
        self.opcode() == Opcode::None
    }

    pub fn keyspace(&self) -> Option<&str> {
        match self {
            Routing::Dual => None,
            Routing::Keyspace(ks) => Some(&ks.keyspace.name),
        }
    }

    pub fn update(&mut self, predicate: &Expression, evaluator: &StaticEvaluator<'_>) {
        if let Routing::Keyspace(ks) = self {
            ks.update(predicate, evaluator);
        }
    }

    /// Run the improvement pass if it applies, keeping the result when it is
    /// cheaper
    pub fn improve(&mut self, config: &PlannerConfig, evaluator: &StaticEvaluator<'_>) {
        if let Routing::Keyspace(ks) = self {
            if let Some(better) = ks.improve(config, evaluator) {
                *ks = better;
            }
        }
    }

    pub fn covers_keys(&self, grouping: &[Expression]) -> bool {
        match self {
            Routing::Dual => true,
            Routing::Keyspace(ks) => ks.covers_keys(grouping),
        }
    }

    pub fn destinations(&self) -> Vec<Destination> {
        match self {
            Routing::Dual => vec![],
            Routing::Keyspace(ks) => ks.destinations(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Routing::Dual => "Dual".to_string(),
            Routing::Keyspace(ks) => {
                let mut text = format!("{}({})", ks.opcode(), ks.keyspace.name);
                let values = ks.shard_values();
                if !values.is_empty() {
                    let rendered: Vec<String> = values
                        .iter()
                        .map(|row| {
                            let parts: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                            if parts.len() == 1 {
                                parts[0].clone()
                            } else {
                                format!("({})", parts.join(", "))
                            }
                        })
                        .collect();
                    text.push_str(&format!(" values=[{}]", rendered.join(", ")));
                }
                let splits = ks.split_opcodes();
                if !splits.is_empty() {
                    let names: Vec<String> = splits.iter().map(|op| op.to_string()).collect();
                    text.push_str(&format!(" split=[{}]", names.join(", ")));
                }
                text
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::evaluator::BindVars;
    use crate::parser::parser::Parser;
    use crate::parser::tokenizer::Tokenizer;
    use crate::schema::{SchemaLookup, VSchema};

    const VSCHEMA: &str = r#"{"keyspaces": {"main": {
        "sharded": true,
        "shards": ["-40", "40-80", "80-c0", "c0-"],
        "vindexes": {"hash": {"type": "hash"}, "pair": {"type": "multicol"}},
        "tables": {
            "t": {"columns": [{"name": "id"}, {"name": "uid"}, {"name": "name", "type": "varchar"}],
                  "column_vindexes": [{"columns": ["id"], "name": "hash"}],
                  "split": {"columns": ["uid"], "function": "mod", "table_count": 4}},
            "pairs": {"columns": [{"name": "a"}, {"name": "b"}],
                  "column_vindexes": [{"columns": ["a", "b"], "name": "pair"}]}
        }}}}"#;

    fn routing(table: &str) -> KeyspaceRouting {
        let vschema = VSchema::from_json(VSCHEMA).unwrap();
        KeyspaceRouting::for_table(0, &vschema.find_table(table).unwrap())
    }

    /// Parse and bind every column to table 0
    fn predicate(sql: &str) -> Expression {
        let tokens = Tokenizer::new().tokenize(sql).unwrap();
        let expr = Parser::new(tokens).parse_expression().unwrap();
        expr.transform_down(&mut |e| match e {
            Expression::Column(col) => Ok(crate::parser::ast::Transformed::Yes(
                Expression::Column(ColumnName::bound("t", &col.name, 0)),
            )),
            other => Ok(crate::parser::ast::Transformed::No(other)),
        })
        .unwrap()
    }

    fn fold(routing: &mut KeyspaceRouting, sql: &str) {
        let vars = BindVars::new();
        routing.update(&predicate(sql), &StaticEvaluator::new(&vars));
    }

    #[test]
    fn test_equality_on_both_axes() {
        let mut r = routing("t");
        assert_eq!(r.opcode(), Opcode::Scatter);
        fold(&mut r, "id = 5");
        assert_eq!(r.opcode(), Opcode::EqualUnique);
        assert!(!r.is_single());
        fold(&mut r, "uid = 7");
        assert!(r.is_single());
        let destinations = r.destinations();
        assert_eq!(destinations.len(), 1);
        assert_eq!(destinations[0].tables.get(&0), Some(&"t_3".to_string()));
    }

    #[test]
    fn test_in_list_handling() {
        let mut r = routing("t");
        fold(&mut r, "id in (1, 2, null)");
        assert_eq!(r.opcode(), Opcode::In);
        assert_eq!(r.shard_values().len(), 2);

        let mut r = routing("t");
        fold(&mut r, "id in (4)");
        assert_eq!(r.opcode(), Opcode::EqualUnique);

        let mut r = routing("t");
        fold(&mut r, "id in (null)");
        assert_eq!(r.opcode(), Opcode::None);
    }

    #[test]
    fn test_null_handling() {
        let mut r = routing("t");
        fold(&mut r, "id = null");
        assert_eq!(r.opcode(), Opcode::None);

        let mut r = routing("t");
        fold(&mut r, "id is null");
        assert_eq!(r.opcode(), Opcode::EqualUnique);
        assert_eq!(r.shard_values(), vec![vec![Value::Null]]);
    }

    #[test]
    fn test_composite_keys() {
        let mut r = routing("pairs");
        fold(&mut r, "a = 1");
        assert_eq!(r.opcode(), Opcode::Scatter);
        fold(&mut r, "b = 2");
        assert_eq!(r.opcode(), Opcode::EqualUnique);

        let mut r = routing("pairs");
        fold(&mut r, "(a, b) in ((1, 2), (3, 4))");
        assert_eq!(r.opcode(), Opcode::MultiEqual);

        let mut r = routing("pairs");
        fold(&mut r, "((a, b)) in (((1, 2)))");
        assert_eq!(r.opcode(), Opcode::EqualUnique);
    }

    #[test]
    fn test_routing_never_regresses() {
        let mut r = routing("t");
        let mut last = r.opcode().cost();
        for sql in ["id in (1, 2, 3)", "name = 'x'", "id = 2", "id in (4, 5)", "uid > 3"] {
            fold(&mut r, sql);
            let cost = r.opcode().cost();
            assert!(cost <= last, "{} raised the cost", sql);
            last = cost;
        }
        assert_eq!(r.opcode(), Opcode::EqualUnique);
    }

    #[test]
    fn test_statically_false_predicate() {
        let mut r = routing("t");
        fold(&mut r, "1 = 0");
        assert_eq!(r.opcode(), Opcode::None);
        assert!(r.destinations().is_empty());
    }

    #[test]
    fn test_improve_with_cnf_and_or_to_in() {
        let vars = BindVars::new();
        let evaluator = StaticEvaluator::new(&vars);
        let config = PlannerConfig::default();

        let mut r = routing("t");
        fold(&mut r, "(id = 1 and uid = 2) or (id = 1 and uid = 3)");
        assert_eq!(r.opcode(), Opcode::Scatter);
        let improved = r.improve(&config, &evaluator).unwrap();
        assert_eq!(improved.opcode(), Opcode::EqualUnique);

        let mut r = routing("t");
        fold(&mut r, "id = 1 or id = 2");
        let improved = r.improve(&config, &evaluator).unwrap();
        assert_eq!(improved.opcode(), Opcode::In);

        let disabled = PlannerConfig {
            improve_routing: false,
            ..PlannerConfig::default()
        };
        assert!(r.improve(&disabled, &evaluator).is_none());
    }

    #[test]
    fn test_scatter_reaches_every_sub_table() {
        let r = routing("t");
        assert_eq!(r.fan_out(), 4);
        assert_eq!(r.destinations().len(), 16);
    }
}
