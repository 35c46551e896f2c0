//! Vindexes: functions mapping sharding-column values to keyspace ids, and
//! the key ranges that assign keyspace ids to shards

use crate::common::error::{PlannerError, PlannerResult};
use crate::types::Value;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use twox_hash::XxHash64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VindexKind {
    /// xxHash64 of the value's key bytes
    Hash,
    /// Integer value used as the keyspace id
    Numeric,
    /// First eight bytes of the SHA-256 digest
    BinarySha256,
    /// Several columns hashed together
    #[serde(rename = "multicol")]
    MultiCol,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vindex {
    pub name: String,
    pub kind: VindexKind,
}

impl Vindex {
    /// Keyspace id for one row of key values. `None` means the row can never
    /// exist (a NULL key, or a value the function cannot map).
    pub fn keyspace_id(&self, values: &[Value]) -> Option<Vec<u8>> {
        if values.is_empty() || values.iter().any(Value::is_null) {
            return None;
        }
        match self.kind {
            VindexKind::Hash => Some(XxHash64::oneshot(0, &values[0].key_bytes()).to_be_bytes().to_vec()),
            VindexKind::Numeric => values[0].as_i64().map(|v| (v as u64).to_be_bytes().to_vec()),
            VindexKind::BinarySha256 => {
                let digest = Sha256::digest(values[0].key_bytes());
                Some(digest[..8].to_vec())
            }
            VindexKind::MultiCol => {
                let mut bytes = Vec::new();
                for value in values {
                    let key = value.key_bytes();
                    bytes.extend_from_slice(&(key.len() as u32).to_be_bytes());
                    bytes.extend_from_slice(&key);
                }
                Some(XxHash64::oneshot(0, &bytes).to_be_bytes().to_vec())
            }
        }
    }
}

/// Half-open range of keyspace ids `[start, end)`; empty bounds are open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
}

impl KeyRange {
    /// Parse Vitess-style shard names such as `-80`, `40-80` or `80-`
    pub fn parse(name: &str) -> PlannerResult<Self> {
        let (start, end) = name.split_once('-').ok_or_else(|| {
            PlannerError::Schema(format!("Invalid shard key range '{}'", name))
        })?;
        let decode = |part: &str| {
            hex::decode(part).map_err(|e| {
                PlannerError::Schema(format!("Invalid shard key range '{}': {}", name, e))
            })
        };
        Ok(Self {
            start: decode(start)?,
            end: decode(end)?,
        })
    }

    pub fn full() -> Self {
        Self {
            start: vec![],
            end: vec![],
        }
    }

    pub fn contains(&self, keyspace_id: &[u8]) -> bool {
        let after_start = self.start.is_empty() || keyspace_id >= self.start.as_slice();
        let before_end = self.end.is_empty() || keyspace_id < self.end.as_slice();
        after_start && before_end
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", hex::encode(&self.start), hex::encode(&self.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_range_parsing() {
        let low = KeyRange::parse("-80").unwrap();
        let high = KeyRange::parse("80-").unwrap();
        assert!(low.contains(&[0x10, 0, 0, 0, 0, 0, 0, 0]));
        assert!(!low.contains(&[0x80, 0, 0, 0, 0, 0, 0, 0]));
        assert!(high.contains(&[0x80, 0, 0, 0, 0, 0, 0, 0]));
        assert_eq!(high.to_string(), "80-");
        assert!(KeyRange::parse("zz").is_err());
    }

    #[test]
    fn test_hash_vindex_is_deterministic() {
        let vindex = Vindex {
            name: "hash".to_string(),
            kind: VindexKind::Hash,
        };
        let a = vindex.keyspace_id(&[Value::Integer(5)]).unwrap();
        let b = vindex.keyspace_id(&[Value::Integer(5)]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert_eq!(vindex.keyspace_id(&[Value::Null]), None);
    }

    #[test]
    fn test_numeric_vindex_requires_integers() {
        let vindex = Vindex {
            name: "num".to_string(),
            kind: VindexKind::Numeric,
        };
        assert_eq!(
            vindex.keyspace_id(&[Value::Integer(1)]),
            Some(vec![0, 0, 0, 0, 0, 0, 0, 1])
        );
        assert_eq!(vindex.keyspace_id(&[Value::varchar("abc")]), None);
    }
}
