//! Keyset pagination
//!
//! Rows are read in chunks ordered by the primary key. The next chunk starts
//! strictly after the last key tuple delivered, expressed as
//!
//! ```text
//! (k1 > v1) OR (k1 = v1 AND k2 > v2) OR ... OR (k1 = v1 AND ... AND kn > vn)
//! ```
//!
//! which is the expanded form of the row comparison `(k1..kn) > (v1..vn)`.
//! Every comparison binds its own parameter; no value is ever inlined into SQL.

use std::cmp::Ordering;
use std::fmt;

use crate::catalog::Table;
use crate::dialect::SqlDialect;
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Rows fetched per chunk unless a backend is configured otherwise
pub const DEFAULT_CHUNK_SIZE: u64 = 1_000_000;

/// Primary-key tuple of the last row delivered. Empty before the first chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanCursor(Vec<Value>);

impl ScanCursor {
    /// Cursor positioned before the first row
    pub fn start() -> Self {
        Self::default()
    }

    /// Cursor from explicit key values
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Capture the primary-key values of `row`, in key order
    pub fn from_row(table: &Table, row: &Row) -> Result<Self> {
        let values = table
            .primary_keys()
            .iter()
            .map(|key| {
                row.get_by_name(key)
                    .cloned()
                    .ok_or_else(|| Error::ColumnNotFound {
                        table: table.qualified_name(),
                        column: key.clone(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(values))
    }

    /// Whether the scan has not delivered any row yet
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Key values
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Number of key values
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for ScanCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}

/// Compare two key tuples lexicographically.
///
/// `None` if some position holds values that cannot be ordered (NULL or
/// mismatched kinds) before a difference is found.
pub fn compare_keys(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b) {
        match x.compare(y)? {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(a.len().cmp(&b.len()))
}

/// "Strictly after the cursor" predicate over a primary key
#[derive(Debug, Clone)]
pub struct KeysetFilter<'a> {
    columns: &'a [String],
    cursor: &'a ScanCursor,
}

impl<'a> KeysetFilter<'a> {
    /// Pair key columns with a cursor of the same arity.
    ///
    /// An empty cursor is accepted for any key and matches every row.
    pub fn new(columns: &'a [String], cursor: &'a ScanCursor) -> Result<Self> {
        if !cursor.is_empty() && cursor.len() != columns.len() {
            return Err(Error::CursorArity {
                expected: columns.len(),
                actual: cursor.len(),
            });
        }
        Ok(Self { columns, cursor })
    }

    /// Whether the filter restricts anything
    #[inline]
    pub fn is_unbounded(&self) -> bool {
        self.cursor.is_empty()
    }

    /// Render the predicate with placeholders numbered from `first_param`.
    ///
    /// Returns `None` for an empty cursor. Parameters are returned in
    /// placeholder order, `n(n+1)/2` of them for an `n`-column key.
    pub fn to_sql(
        &self,
        dialect: &dyn SqlDialect,
        first_param: usize,
    ) -> Option<(String, Vec<Value>)> {
        if self.is_unbounded() {
            return None;
        }

        let values = self.cursor.values();
        let mut params = Vec::with_capacity(values.len() * (values.len() + 1) / 2);
        let mut disjuncts = Vec::with_capacity(values.len());

        for i in 0..self.columns.len() {
            let mut terms = Vec::with_capacity(i + 1);
            for j in 0..=i {
                let op = if j < i { "=" } else { ">" };
                terms.push(format!(
                    "{} {} {}",
                    dialect.quote_identifier(&self.columns[j]),
                    op,
                    dialect.placeholder(first_param + params.len())
                ));
                params.push(values[j].clone());
            }

            if terms.len() == 1 {
                disjuncts.append(&mut terms);
            } else {
                disjuncts.push(format!("({})", terms.join(" AND ")));
            }
        }

        Some((disjuncts.join(" OR "), params))
    }

    /// Evaluate the predicate against a key tuple in memory
    pub fn matches(&self, key: &[Value]) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let cursor = self.cursor.values();
        if key.len() != cursor.len() {
            return false;
        }
        (0..cursor.len()).any(|i| {
            let prefix_equal =
                (0..i).all(|j| key[j].compare(&cursor[j]) == Some(Ordering::Equal));
            prefix_equal && key[i].compare(&cursor[i]) == Some(Ordering::Greater)
        })
    }
}

/// One chunk query for a table
#[derive(Debug, Clone)]
pub struct KeysetQuery<'a> {
    table: &'a Table,
    cursor: &'a ScanCursor,
    limit: u64,
}

impl<'a> KeysetQuery<'a> {
    /// Query for the chunk after `cursor`
    pub fn new(table: &'a Table, cursor: &'a ScanCursor, limit: u64) -> Self {
        Self {
            table,
            cursor,
            limit,
        }
    }

    /// Render `SELECT .. FROM .. [WHERE ..] ORDER BY .. <limit>` with its
    /// bound parameters
    pub fn to_sql(&self, dialect: &dyn SqlDialect) -> Result<(String, Vec<Value>)> {
        let keys = self.table.primary_keys();
        if keys.is_empty() {
            return Err(Error::MissingPrimaryKey {
                schema: self.table.schema().to_string(),
                table: self.table.name().to_string(),
            });
        }

        let columns = if self.table.columns().is_empty() {
            "*".to_string()
        } else {
            self.table
                .columns()
                .iter()
                .map(|c| dialect.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!(
            "SELECT {} FROM {}",
            columns,
            dialect.qualified_table(self.table.schema(), self.table.name())
        );

        let filter = KeysetFilter::new(keys, self.cursor)?;
        let params = match filter.to_sql(dialect, 1) {
            Some((predicate, params)) => {
                sql.push_str(&format!(" WHERE ({})", predicate));
                params
            }
            None => Vec::new(),
        };

        let order_by = keys
            .iter()
            .map(|k| format!("{} ASC", dialect.quote_identifier(k)))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" ORDER BY {}", order_by));
        sql.push_str(&dialect.limit_sql(self.limit));

        Ok((sql, params))
    }
}
