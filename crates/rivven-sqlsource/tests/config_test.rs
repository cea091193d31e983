//! Tests for source configuration

use rivven_sqlsource::config::{expand_env_vars, SourceConfig};
use rivven_sqlsource::Error;
use std::path::PathBuf;

#[test]
fn test_env_expansion() {
    std::env::set_var("SQLSOURCE_TEST_DB_PASSWORD", "hunter2");
    assert_eq!(
        expand_env_vars("password: ${SQLSOURCE_TEST_DB_PASSWORD}"),
        "password: hunter2"
    );
    assert_eq!(
        expand_env_vars("host: ${SQLSOURCE_TEST_UNSET_HOST:-db.internal}"),
        "host: db.internal"
    );
    assert_eq!(expand_env_vars("user: ${SQLSOURCE_TEST_UNSET_USER}"), "user: ");
}

#[test]
fn test_from_file() {
    std::env::set_var("SQLSOURCE_TEST_FILE_PASSWORD", "s3cret");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sqlsource.yaml");
    std::fs::write(
        &path,
        r#"
connection:
  host: db
  port: 5433
  username: reader
  password: ${SQLSOURCE_TEST_FILE_PASSWORD}
  database: shop
  options:
    - sslmode=disable
concurrency: 4
catalog_path: /var/lib/sqlsource/schema.json
chunk_size: 5000
"#,
    )
    .unwrap();

    let config = SourceConfig::from_file(&path).unwrap();
    assert_eq!(config.concurrency, 4);
    assert_eq!(config.chunk_size, 5000);
    assert_eq!(
        config.catalog_path,
        PathBuf::from("/var/lib/sqlsource/schema.json")
    );
    assert_eq!(config.connection.port, 5433);
    assert_eq!(config.connection.password.expose_secret(), "s3cret");
    assert!(!format!("{:?}", config).contains("s3cret"));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = SourceConfig::from_file(dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}

#[test]
fn test_invalid_values_rejected() {
    let zero_concurrency = r#"
connection:
  host: db
  port: 5432
  username: reader
  database: shop
concurrency: 0
"#;
    assert!(matches!(
        SourceConfig::from_yaml(zero_concurrency).unwrap_err(),
        Error::Configuration { .. }
    ));

    let no_database = r#"
connection:
  host: db
  port: 5432
  username: reader
  database: ""
"#;
    assert!(SourceConfig::from_yaml(no_database).is_err());

    let bad_option = r#"
connection:
  host: db
  port: 5432
  username: reader
  database: shop
  options: ["sslmode"]
"#;
    let err = SourceConfig::from_yaml(bad_option).unwrap_err();
    assert!(err.to_string().contains("key=value"));
}
