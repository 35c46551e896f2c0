//! Split sub-tables: a logical table stored as `table_count` physical tables
//! inside every shard, chosen by a hash of the split columns

use crate::types::Value;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use twox_hash::XxHash64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitHash {
    /// Integer value modulo the table count; other values fall back to xxhash
    Mod,
    #[serde(alias = "xxhash64")]
    Xxhash,
    Sha256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitDef {
    pub columns: Vec<String>,
    #[serde(default = "default_split_hash")]
    pub function: SplitHash,
    pub table_count: usize,
}

fn default_split_hash() -> SplitHash {
    SplitHash::Mod
}

impl SplitDef {
    /// Sub-table index holding rows with the given split key values;
    /// `None` for a NULL key
    pub fn sub_table(&self, values: &[Value]) -> Option<usize> {
        if self.table_count == 0 || values.is_empty() || values.iter().any(Value::is_null) {
            return None;
        }
        let count = self.table_count as u64;
        let index = match self.function {
            SplitHash::Mod if values.len() == 1 => match values[0].as_i64() {
                Some(v) => v.rem_euclid(self.table_count as i64) as u64,
                None => hash_values(values) % count,
            },
            SplitHash::Mod | SplitHash::Xxhash => hash_values(values) % count,
            SplitHash::Sha256 => {
                let mut hasher = Sha256::new();
                for value in values {
                    hasher.update(value.key_bytes());
                }
                let digest = hasher.finalize();
                let mut prefix = [0u8; 8];
                prefix.copy_from_slice(&digest[..8]);
                u64::from_be_bytes(prefix) % count
            }
        };
        Some(index as usize)
    }

    /// Physical name of one sub-table
    pub fn physical_name(table: &str, index: usize) -> String {
        format!("{}_{}", table, index)
    }
}

fn hash_values(values: &[Value]) -> u64 {
    let mut bytes = Vec::new();
    for value in values {
        bytes.extend_from_slice(&value.key_bytes());
    }
    XxHash64::oneshot(0, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(function: SplitHash, table_count: usize) -> SplitDef {
        SplitDef {
            columns: vec!["uid".to_string()],
            function,
            table_count,
        }
    }

    #[test]
    fn test_mod_split() {
        let def = split(SplitHash::Mod, 4);
        assert_eq!(def.sub_table(&[Value::Integer(7)]), Some(3));
        assert_eq!(def.sub_table(&[Value::Integer(-1)]), Some(3));
        assert_eq!(def.sub_table(&[Value::Null]), None);
    }

    #[test]
    fn test_hashed_split_stays_in_range() {
        for function in [SplitHash::Xxhash, SplitHash::Sha256] {
            let def = split(function, 3);
            for v in 0..20 {
                let index = def.sub_table(&[Value::Integer(v)]).unwrap();
                assert!(index < 3);
            }
        }
    }

    #[test]
    fn test_physical_name() {
        assert_eq!(SplitDef::physical_name("orders", 2), "orders_2");
    }
}
