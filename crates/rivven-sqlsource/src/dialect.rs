//! SQL dialect abstraction
//!
//! Everything vendor specific the scanner emits goes through [`SqlDialect`]:
//! - identifier quoting and parameter placeholders
//! - the row-limit clause for a chunk
//! - the catalog query used by `describe`
//!
//! Every catalog query returns the columns `table_schema`, `table_name`,
//! `column_name` and `is_primary_key`, ordered by schema, table and column
//! position so primary keys are described in a stable order.
//!
//! Only PostgreSQL ships a driver (the `postgres` feature). The MySQL and
//! SQL Server dialects are picked by [`dialect_for`] when a
//! [`ConnectionFactory`](crate::connection::ConnectionFactory) for that
//! database is plugged into [`SqlBackend`](crate::backend::SqlBackend).

use crate::connection::DatabaseType;

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Quote an identifier (schema, table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Get the placeholder for a parameter (1-based, e.g. $1, ?, @p1)
    fn placeholder(&self, index: usize) -> String;

    /// Clause appended after `ORDER BY` to cap a chunk
    fn limit_sql(&self, limit: u64) -> String;

    /// Query listing every column with its primary-key flag
    fn describe_catalog_sql(&self) -> &'static str;

    /// Quote `schema.table`
    fn qualified_table(&self, schema: &str, table: &str) -> String {
        format!(
            "{}.{}",
            self.quote_identifier(schema),
            self.quote_identifier(table)
        )
    }
}

const POSTGRES_DESCRIBE_SQL: &str = r#"WITH pk AS (
    SELECT
        s.nspname AS table_schema,
        t.relname AS table_name,
        c.conkey AS column_positions
    FROM pg_catalog.pg_constraint c
        LEFT JOIN pg_catalog.pg_class t ON c.conrelid = t.oid
        LEFT JOIN pg_catalog.pg_namespace s ON t.relnamespace = s.oid
    WHERE c.contype = 'p'
)
SELECT
    col.table_schema::text AS table_schema,
    col.table_name::text AS table_name,
    col.column_name::text AS column_name,
    col.ordinal_position = ANY(pk.column_positions) AS is_primary_key
FROM pk
    INNER JOIN information_schema.columns col
        ON pk.table_schema = col.table_schema
        AND pk.table_name = col.table_name
ORDER BY col.table_schema, col.table_name, col.ordinal_position"#;

/// PostgreSQL dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn limit_sql(&self, limit: u64) -> String {
        format!(" LIMIT {}", limit)
    }

    fn describe_catalog_sql(&self) -> &'static str {
        POSTGRES_DESCRIBE_SQL
    }
}

const MYSQL_DESCRIBE_SQL: &str = r#"SELECT
    c.TABLE_SCHEMA AS table_schema,
    c.TABLE_NAME AS table_name,
    c.COLUMN_NAME AS column_name,
    c.COLUMN_KEY = 'PRI' AS is_primary_key
FROM information_schema.COLUMNS c
    INNER JOIN information_schema.TABLES t
        ON t.TABLE_SCHEMA = c.TABLE_SCHEMA
        AND t.TABLE_NAME = c.TABLE_NAME
WHERE t.TABLE_TYPE = 'BASE TABLE'
    AND c.TABLE_SCHEMA NOT IN ('mysql', 'information_schema', 'performance_schema', 'sys')
ORDER BY c.TABLE_SCHEMA, c.TABLE_NAME, c.ORDINAL_POSITION"#;

/// MySQL/MariaDB dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn limit_sql(&self, limit: u64) -> String {
        format!(" LIMIT {}", limit)
    }

    fn describe_catalog_sql(&self) -> &'static str {
        MYSQL_DESCRIBE_SQL
    }
}

const SQLSERVER_DESCRIBE_SQL: &str = r#"SELECT
    c.TABLE_SCHEMA AS table_schema,
    c.TABLE_NAME AS table_name,
    c.COLUMN_NAME AS column_name,
    CAST(CASE WHEN ku.COLUMN_NAME IS NOT NULL THEN 1 ELSE 0 END AS BIT) AS is_primary_key
FROM INFORMATION_SCHEMA.COLUMNS c
    INNER JOIN INFORMATION_SCHEMA.TABLES t
        ON t.TABLE_SCHEMA = c.TABLE_SCHEMA
        AND t.TABLE_NAME = c.TABLE_NAME
    LEFT JOIN INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
        ON tc.TABLE_SCHEMA = c.TABLE_SCHEMA
        AND tc.TABLE_NAME = c.TABLE_NAME
        AND tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
    LEFT JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku
        ON ku.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
        AND ku.TABLE_SCHEMA = c.TABLE_SCHEMA
        AND ku.TABLE_NAME = c.TABLE_NAME
        AND ku.COLUMN_NAME = c.COLUMN_NAME
WHERE t.TABLE_TYPE = 'BASE TABLE'
ORDER BY c.TABLE_SCHEMA, c.TABLE_NAME, c.ORDINAL_POSITION"#;

/// SQL Server dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "SQL Server"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@p{}", index)
    }

    fn limit_sql(&self, limit: u64) -> String {
        // OFFSET-FETCH needs the ORDER BY the chunk query always has
        format!(" OFFSET 0 ROWS FETCH NEXT {} ROWS ONLY", limit)
    }

    fn describe_catalog_sql(&self) -> &'static str {
        SQLSERVER_DESCRIBE_SQL
    }
}

/// Get the dialect for a database type
pub fn dialect_for(db_type: DatabaseType) -> Box<dyn SqlDialect> {
    match db_type {
        DatabaseType::PostgreSQL | DatabaseType::Unknown => Box::new(PostgresDialect),
        DatabaseType::MySQL => Box::new(MySqlDialect),
        DatabaseType::SqlServer => Box::new(SqlServerDialect),
    }
}
