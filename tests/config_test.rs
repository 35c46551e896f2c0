use prism_router::{PlannerConfig, PlannerResult, SchemaLookup, VSchema};
use std::io::Write;
use tempfile::NamedTempFile;

const VSCHEMA: &str = include_str!("fixtures/vschema.json");

#[test]
fn test_vschema_from_file() -> PlannerResult<()> {
    let mut file = NamedTempFile::new()?;
    file.write_all(VSCHEMA.as_bytes())?;

    let vschema = VSchema::from_file(file.path())?;
    let orders = vschema.find_table("orders")?;
    assert_eq!(orders.keyspace.name, "commerce");
    assert_eq!(orders.keyspace.shards.len(), 4);
    assert_eq!(orders.table.split.as_ref().map(|s| s.table_count), Some(4));

    let region = vschema.find_table("region")?;
    assert!(!region.keyspace.sharded);
    Ok(())
}

#[test]
fn test_missing_vschema_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = VSchema::from_file(dir.path().join("missing.json")).unwrap_err();
    assert_eq!(err.kind(), "io");
}

#[test]
fn test_malformed_vschema_is_rejected() {
    let err = VSchema::from_json(r#"{"keyspaces": {"ks": {"sharded": "yes"}}}"#).unwrap_err();
    assert_eq!(err.kind(), "serialization");
}

#[test]
fn test_config_file_overrides_defaults() -> PlannerResult<()> {
    let mut file = NamedTempFile::new()?;
    write!(file, r#"{{"max_cnf_clauses": 8, "improve_routing": false}}"#)?;

    let config = PlannerConfig::from_file(file.path())?;
    assert_eq!(config.max_cnf_clauses, 8);
    assert!(!config.improve_routing);
    assert_eq!(config.max_revisits, PlannerConfig::default().max_revisits);
    Ok(())
}
