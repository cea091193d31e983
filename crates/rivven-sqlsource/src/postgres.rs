//! PostgreSQL connection
//!
//! A [`Connection`] over `tokio-postgres`. Paired with
//! [`PostgresDialect`](crate::dialect::PostgresDialect) through
//! [`backend`], it gives a ready-to-use [`SqlBackend`].

use async_trait::async_trait;
use bytes::BytesMut;
use postgres_protocol::types as protocol;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tracing::error;

use crate::backend::SqlBackend;
use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType};
use crate::dialect::PostgresDialect;
use crate::error::{Error, Result};
use crate::types::{Row, Value};

type BoxError = Box<dyn std::error::Error + Sync + Send>;

fn is_enum(ty: &Type) -> bool {
    matches!(ty.kind(), Kind::Enum(_))
}

/// Render an inet value the way PostgreSQL prints it: the netmask is omitted
/// when it covers the whole address.
fn format_inet(addr: IpAddr, netmask: u8) -> String {
    let full = if addr.is_ipv4() { 32 } else { 128 };
    if netmask == full {
        addr.to_string()
    } else {
        format!("{}/{}", addr, netmask)
    }
}

fn parse_inet(s: &str) -> std::result::Result<(IpAddr, u8), BoxError> {
    let (addr, netmask) = match s.split_once('/') {
        Some((addr, mask)) => (addr.parse::<IpAddr>()?, Some(mask.parse::<u8>()?)),
        None => (s.parse::<IpAddr>()?, None),
    };
    let full = if addr.is_ipv4() { 32 } else { 128 };
    Ok((addr, netmask.unwrap_or(full)))
}

/// Text parameter that also binds to enum and inet columns, so a cursor
/// captured from such a key can be sent back in the next chunk query.
#[derive(Debug)]
struct PgText(String);

impl ToSql for PgText {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        if *ty == Type::INET {
            let (addr, netmask) = parse_inet(&self.0)?;
            protocol::inet_to_sql(addr, netmask, out);
            Ok(IsNull::No)
        } else if is_enum(ty) {
            // enum labels use their UTF-8 text as binary representation
            out.extend_from_slice(self.0.as_bytes());
            Ok(IsNull::No)
        } else {
            <&str as ToSql>::to_sql(&self.0.as_str(), ty, out)
        }
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INET || is_enum(ty) || <&str as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

/// Convert a Value to a tokio-postgres compatible parameter
fn value_to_sql(value: &Value) -> Box<dyn ToSql + Sync + Send> {
    match value {
        Value::Null => Box::new(Option::<i32>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Int8(n) => Box::new(i16::from(*n)), // PostgreSQL has no 1-byte integer
        Value::Int16(n) => Box::new(*n),
        Value::Int32(n) => Box::new(*n),
        Value::Int64(n) => Box::new(*n),
        Value::Float32(n) => Box::new(*n),
        Value::Float64(n) => Box::new(*n),
        Value::Decimal(d) => Box::new(*d),
        Value::String(s) => Box::new(PgText(s.clone())),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::Date(d) => Box::new(*d),
        Value::Time(t) => Box::new(*t),
        Value::DateTime(dt) => Box::new(*dt),
        Value::DateTimeTz(dt) => Box::new(*dt),
        Value::Uuid(u) => Box::new(*u),
        Value::Json(j) => Box::new(j.clone()),
    }
}

fn typed<'a, T, F>(ty: &Type, raw: &'a [u8], wrap: F) -> std::result::Result<Value, BoxError>
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    T::from_sql(ty, raw).map(wrap)
}

/// Decode a non-NULL column value by its PostgreSQL type.
///
/// Types without a mapping are an error, never a silent NULL.
fn decode(ty: &Type, raw: &[u8]) -> std::result::Result<Value, BoxError> {
    match *ty {
        Type::BOOL => typed(ty, raw, Value::Bool),
        Type::CHAR => typed(ty, raw, Value::Int8),
        Type::INT2 => typed(ty, raw, Value::Int16),
        Type::INT4 => typed(ty, raw, Value::Int32),
        Type::INT8 => typed(ty, raw, Value::Int64),
        Type::OID => typed(ty, raw, |oid: u32| Value::Int64(i64::from(oid))),
        Type::FLOAT4 => typed(ty, raw, Value::Float32),
        Type::FLOAT8 => typed(ty, raw, Value::Float64),
        Type::NUMERIC => typed(ty, raw, Value::Decimal),
        Type::BYTEA => typed(ty, raw, Value::Bytes),
        Type::DATE => typed(ty, raw, Value::Date),
        Type::TIME => typed(ty, raw, Value::Time),
        Type::TIMESTAMP => typed(ty, raw, Value::DateTime),
        Type::TIMESTAMPTZ => typed(ty, raw, Value::DateTimeTz),
        Type::UUID => typed(ty, raw, Value::Uuid),
        Type::JSON | Type::JSONB => typed(ty, raw, Value::Json),
        Type::INET => {
            let inet = protocol::inet_from_sql(raw)?;
            Ok(Value::String(format_inet(inet.addr(), inet.netmask())))
        }
        _ if is_enum(ty) => Ok(Value::String(protocol::text_from_sql(raw)?.to_string())),
        // text, varchar, name, citext, ltree
        _ if <String as FromSql>::accepts(ty) => typed(ty, raw, Value::String),
        _ => Err(format!("unsupported column type {}", ty.name()).into()),
    }
}

/// A decoded column value
struct PgValue(Value);

impl<'a> FromSql<'a> for PgValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        decode(ty, raw).map(PgValue)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Convert a tokio-postgres row to a Row
fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Result<Row> {
    let mut columns = Vec::with_capacity(pg_row.len());
    let mut values = Vec::with_capacity(pg_row.len());

    for (i, col) in pg_row.columns().iter().enumerate() {
        let value = pg_row
            .try_get::<_, Option<PgValue>>(i)
            .map_err(|e| {
                Error::row_iteration(format!(
                    "cannot decode column {} of type {}: {}",
                    col.name(),
                    col.type_().name(),
                    e
                ))
            })?
            .map_or(Value::Null, |v| v.0);
        columns.push(col.name().to_string());
        values.push(value);
    }

    Ok(Row::new(columns, values))
}

fn connect_error(e: tokio_postgres::Error) -> Error {
    let rejected = e.code().is_some_and(|code| {
        *code == SqlState::INVALID_PASSWORD
            || *code == SqlState::INVALID_AUTHORIZATION_SPECIFICATION
    });

    if rejected {
        Error::Authentication {
            message: e.to_string(),
        }
    } else {
        Error::connection_with_source("failed to connect", e)
    }
}

/// PostgreSQL connection
pub struct PgConnection {
    client: Arc<tokio_postgres::Client>,
    closed: AtomicBool,
}

impl PgConnection {
    /// Create a new connection from a tokio-postgres client
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client: Arc::new(client),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the underlying client
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.client
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::connection("connection is closed"));
        }

        let boxed_params: Vec<Box<dyn ToSql + Sync + Send>> =
            params.iter().map(value_to_sql).collect();

        let param_refs: Vec<&(dyn ToSql + Sync)> = boxed_params
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let pg_rows = self
            .client
            .query(sql, &param_refs)
            .await
            .map_err(|e| Error::query_with_sql(e.to_string(), sql))?;

        pg_rows.iter().map(pg_row_to_row).collect()
    }

    async fn is_valid(&self) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Opens [`PgConnection`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let url = config.to_url(DatabaseType::PostgreSQL.scheme())?;
        let (client, connection) = tokio_postgres::connect(url.as_str(), tokio_postgres::NoTls)
            .await
            .map_err(connect_error)?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "postgres connection error");
            }
        });

        Ok(Box::new(PgConnection::new(client)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}

/// SQL backend for PostgreSQL
pub fn backend() -> SqlBackend {
    SqlBackend::with_dialect(Arc::new(PgConnectionFactory), Box::new(PostgresDialect))
}
