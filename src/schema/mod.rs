//! Partitioning schema ("vschema")
//!
//! Describes, per logical table, the keyspace it lives in, the vindexes that
//! pick its shard and the optional split definition that picks its sub-table.
//! Loaded from JSON and consulted read-only during planning.

pub mod split;
pub mod vindex;

pub use split::*;
pub use vindex::*;

use crate::common::error::{PlannerError, PlannerResult};
use crate::types::LogicalType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Read-only table lookup used by semantic analysis
pub trait SchemaLookup {
    fn find_table(&self, name: &str) -> PlannerResult<ResolvedTable>;
}

#[derive(Debug, Clone)]
pub struct ResolvedTable {
    pub keyspace: Arc<Keyspace>,
    pub table: Arc<TableDef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub name: String,
    pub range: KeyRange,
}

#[derive(Debug)]
pub struct Keyspace {
    pub name: String,
    pub sharded: bool,
    pub shards: Vec<Shard>,
    pub vindexes: BTreeMap<String, Vindex>,
    pub tables: BTreeMap<String, Arc<TableDef>>,
}

impl Keyspace {
    /// Shard owning a keyspace id
    pub fn shard_for(&self, keyspace_id: &[u8]) -> Option<&Shard> {
        self.shards.iter().find(|s| s.range.contains(keyspace_id))
    }

    pub fn shard_names(&self) -> Vec<String> {
        self.shards.iter().map(|s| s.name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type", default = "unknown_type")]
    pub data_type: LogicalType,
}

fn unknown_type() -> LogicalType {
    LogicalType::Unknown
}

/// A vindex bound to the table columns it is computed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnVindex {
    pub columns: Vec<String>,
    pub vindex: Vindex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub keyspace: String,
    pub columns: Vec<ColumnDef>,
    /// The column list is complete, so `*` can be expanded and unknown
    /// columns rejected
    pub authoritative: bool,
    pub column_vindexes: Vec<ColumnVindex>,
    pub split: Option<SplitDef>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

// Raw JSON layout

#[derive(Debug, Deserialize)]
struct VSchemaSource {
    keyspaces: BTreeMap<String, KeyspaceSource>,
}

#[derive(Debug, Deserialize)]
struct KeyspaceSource {
    #[serde(default)]
    sharded: bool,
    #[serde(default)]
    shards: Vec<String>,
    #[serde(default)]
    vindexes: BTreeMap<String, VindexSource>,
    #[serde(default)]
    tables: BTreeMap<String, TableSource>,
}

#[derive(Debug, Deserialize)]
struct VindexSource {
    #[serde(rename = "type")]
    kind: VindexKind,
}

#[derive(Debug, Deserialize)]
struct ColumnVindexSource {
    columns: Vec<String>,
    name: String,
}

#[derive(Debug, Deserialize)]
struct TableSource {
    #[serde(default)]
    columns: Vec<ColumnDef>,
    authoritative: Option<bool>,
    #[serde(default)]
    column_vindexes: Vec<ColumnVindexSource>,
    split: Option<SplitDef>,
}

/// The complete partitioning description
#[derive(Debug, Default)]
pub struct VSchema {
    keyspaces: BTreeMap<String, Arc<Keyspace>>,
}

impl VSchema {
    pub fn from_json(json: &str) -> PlannerResult<Self> {
        let source: VSchemaSource = serde_json::from_str(json)?;
        let mut keyspaces = BTreeMap::new();
        for (name, ks) in source.keyspaces {
            let keyspace = build_keyspace(&name, ks)?;
            keyspaces.insert(name, Arc::new(keyspace));
        }
        tracing::debug!(keyspaces = keyspaces.len(), "loaded vschema");
        Ok(Self { keyspaces })
    }

    pub fn from_file(path: impl AsRef<Path>) -> PlannerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn keyspace(&self, name: &str) -> Option<&Arc<Keyspace>> {
        self.keyspaces.get(name)
    }

    pub fn keyspaces(&self) -> impl Iterator<Item = &Arc<Keyspace>> {
        self.keyspaces.values()
    }
}

impl SchemaLookup for VSchema {
    fn find_table(&self, name: &str) -> PlannerResult<ResolvedTable> {
        let mut found: Option<ResolvedTable> = None;
        for keyspace in self.keyspaces.values() {
            if let Some(table) = keyspace.tables.get(name) {
                if found.is_some() {
                    return Err(PlannerError::Schema(format!(
                        "Table '{}' is defined in more than one keyspace",
                        name
                    )));
                }
                found = Some(ResolvedTable {
                    keyspace: keyspace.clone(),
                    table: table.clone(),
                });
            }
        }
        found.ok_or_else(|| PlannerError::UnknownTable(name.to_string()))
    }
}

fn build_keyspace(name: &str, source: KeyspaceSource) -> PlannerResult<Keyspace> {
    let shard_names = if !source.shards.is_empty() {
        source.shards
    } else if source.sharded {
        vec!["-80".to_string(), "80-".to_string()]
    } else {
        vec!["0".to_string()]
    };

    let shards = if source.sharded {
        shard_names
            .into_iter()
            .map(|shard| {
                Ok(Shard {
                    range: KeyRange::parse(&shard)?,
                    name: shard,
                })
            })
            .collect::<PlannerResult<Vec<_>>>()?
    } else {
        if shard_names.len() != 1 {
            return Err(PlannerError::Schema(format!(
                "Unsharded keyspace '{}' must have exactly one shard",
                name
            )));
        }
        vec![Shard {
            name: shard_names[0].clone(),
            range: KeyRange::full(),
        }]
    };

    let vindexes: BTreeMap<String, Vindex> = source
        .vindexes
        .into_iter()
        .map(|(vname, v)| {
            (
                vname.clone(),
                Vindex {
                    name: vname,
                    kind: v.kind,
                },
            )
        })
        .collect();

    let mut tables = BTreeMap::new();
    for (table_name, table) in source.tables {
        let mut column_vindexes = Vec::new();
        for cv in table.column_vindexes {
            let vindex = vindexes.get(&cv.name).cloned().ok_or_else(|| {
                PlannerError::Schema(format!(
                    "Table '{}' references unknown vindex '{}'",
                    table_name, cv.name
                ))
            })?;
            if cv.columns.is_empty()
                || (vindex.kind != VindexKind::MultiCol && cv.columns.len() != 1)
            {
                return Err(PlannerError::Schema(format!(
                    "Vindex '{}' on table '{}' has an invalid column list",
                    cv.name, table_name
                )));
            }
            column_vindexes.push(ColumnVindex {
                columns: cv.columns,
                vindex,
            });
        }

        if source.sharded && column_vindexes.is_empty() {
            return Err(PlannerError::Schema(format!(
                "Sharded table '{}' has no vindex",
                table_name
            )));
        }
        if let Some(split) = &table.split {
            if split.table_count == 0 || split.columns.is_empty() {
                return Err(PlannerError::Schema(format!(
                    "Split definition of table '{}' needs columns and a positive table_count",
                    table_name
                )));
            }
        }

        let authoritative = table.authoritative.unwrap_or(!table.columns.is_empty());
        tables.insert(
            table_name.clone(),
            Arc::new(TableDef {
                name: table_name,
                keyspace: name.to_string(),
                columns: table.columns,
                authoritative,
                column_vindexes,
                split: table.split,
            }),
        );
    }

    Ok(Keyspace {
        name: name.to_string(),
        sharded: source.sharded,
        shards,
        vindexes,
        tables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VSCHEMA: &str = r#"{
        "keyspaces": {
            "main": {
                "sharded": true,
                "shards": ["-40", "40-80", "80-c0", "c0-"],
                "vindexes": {"hash": {"type": "hash"}},
                "tables": {
                    "orders": {
                        "columns": [{"name": "id", "type": "bigint"}, {"name": "note", "type": "varchar"}],
                        "column_vindexes": [{"columns": ["id"], "name": "hash"}],
                        "split": {"columns": ["id"], "function": "mod", "table_count": 4}
                    }
                }
            },
            "lookup": {"tables": {"settings": {}}}
        }
    }"#;

    #[test]
    fn test_load_vschema() {
        let vschema = VSchema::from_json(VSCHEMA).unwrap();
        let orders = vschema.find_table("orders").unwrap();
        assert_eq!(orders.keyspace.name, "main");
        assert_eq!(orders.keyspace.shards.len(), 4);
        assert!(orders.table.authoritative);
        assert_eq!(orders.table.split.as_ref().map(|s| s.table_count), Some(4));

        let settings = vschema.find_table("settings").unwrap();
        assert!(!settings.keyspace.sharded);
        assert!(!settings.table.authoritative);
        assert_eq!(settings.keyspace.shard_names(), vec!["0".to_string()]);
    }

    #[test]
    fn test_every_keyspace_id_has_one_shard() {
        let vschema = VSchema::from_json(VSCHEMA).unwrap();
        let main = vschema.keyspace("main").unwrap();
        for first in [0x00u8, 0x3f, 0x40, 0x7f, 0x80, 0xc0, 0xff] {
            let id = [first, 1, 2, 3, 4, 5, 6, 7];
            let owners = main.shards.iter().filter(|s| s.range.contains(&id)).count();
            assert_eq!(owners, 1);
        }
    }

    #[test]
    fn test_unknown_vindex_is_rejected() {
        let json = r#"{"keyspaces": {"ks": {"sharded": true, "tables": {
            "t": {"column_vindexes": [{"columns": ["id"], "name": "missing"}]}}}}}"#;
        assert!(matches!(
            VSchema::from_json(json),
            Err(PlannerError::Schema(_))
        ));
    }

    #[test]
    fn test_unknown_table() {
        let vschema = VSchema::from_json(VSCHEMA).unwrap();
        assert!(matches!(
            vschema.find_table("nope"),
            Err(PlannerError::UnknownTable(_))
        ));
    }
}
