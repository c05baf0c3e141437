//! # Database Module
//!
//! Connection pooling and driver detection for sequel, plus the [`Connection`] trait the
//! statement layer executes through. Statements are sent through sqlx's `Any` driver, so
//! one build talks to PostgreSQL, MySQL and SQLite.

// ============================================================================
// External Crate Imports
// ============================================================================

use std::collections::VecDeque;

use futures::future::BoxFuture;
use log::debug;
use sqlx::{
    any::{AnyArguments, AnyPoolOptions, AnyQueryResult, AnyRow},
    Any, AnyConnection, AnyPool, Arguments, Column, Decode, Executor, Row, Statement, TypeInfo, ValueRef,
};

// ============================================================================
// Internal Crate Imports
// ============================================================================

use crate::{
    dialect::Dialect,
    error::Error,
    mapper::{Mapper, Queryable},
    transaction::Transaction,
    value::{Value, ValueKind},
};

// ============================================================================
// Statement Results
// ============================================================================

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Generated id reported by the driver, if it reports one.
    pub last_insert_id: Option<i64>,
}

impl From<AnyQueryResult> for ExecResult {
    fn from(result: AnyQueryResult) -> Self {
        ExecResult { rows_affected: result.rows_affected(), last_insert_id: result.last_insert_id() }
    }
}

/// Buffered result rows with their column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
}

impl Rows {
    pub fn new(columns: Vec<String>, rows: impl IntoIterator<Item = Vec<Value>>) -> Self {
        Rows { columns, rows: rows.into_iter().collect() }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Takes the next row, in result order.
    pub fn next(&mut self) -> Option<Vec<Value>> {
        self.rows.pop_front()
    }

    /// Rows not yet taken.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Runs a query on `conn` and buffers the result.
    ///
    /// Column names come from the first row. An empty result has no rows to ask, so the
    /// statement is prepared again on the same connection to learn its columns.
    pub(crate) async fn fetch(conn: &mut AnyConnection, sql: &str, args: Vec<Value>) -> Result<Self, Error> {
        let rows = sqlx::query_with(sql, bind(args)?).fetch_all(&mut *conn).await?;
        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_owned()).collect(),
            None => {
                let statement = (&mut *conn).prepare(sql).await?;
                statement.columns().iter().map(|c| c.name().to_owned()).collect()
            }
        };
        let rows = rows
            .iter()
            .map(|row| (0..row.len()).map(|i| decode_column(row, i)).collect::<Result<Vec<_>, _>>())
            .collect::<Result<VecDeque<_>, _>>()?;
        Ok(Rows { columns, rows })
    }
}

// ============================================================================
// Connection Trait
// ============================================================================

/// Executes expanded statements. Implemented by [`Database`] and [`Transaction`].
pub trait Connection: Send + Sync {
    fn execute<'a>(&'a self, sql: &'a str, args: Vec<Value>) -> BoxFuture<'a, Result<ExecResult, Error>>;

    fn query<'a>(&'a self, sql: &'a str, args: Vec<Value>) -> BoxFuture<'a, Result<Rows, Error>>;

    /// First row of the result, if any.
    fn query_row<'a>(&'a self, sql: &'a str, args: Vec<Value>) -> BoxFuture<'a, Result<Option<Vec<Value>>, Error>> {
        Box::pin(async move { Ok(self.query(sql, args).await?.next()) })
    }
}

pub(crate) fn bind<'q>(args: Vec<Value>) -> Result<AnyArguments<'q>, sqlx::Error> {
    let mut out = AnyArguments::default();
    for value in args {
        let added = match value {
            Value::Null(ValueKind::Bool) => out.add(Option::<bool>::None),
            Value::Null(ValueKind::Int) => out.add(Option::<i64>::None),
            Value::Null(ValueKind::Float) => out.add(Option::<f64>::None),
            Value::Null(ValueKind::Text) => out.add(Option::<String>::None),
            Value::Null(ValueKind::Bytes) => out.add(Option::<Vec<u8>>::None),
            Value::Bool(v) => out.add(v),
            Value::Int(v) => out.add(v),
            Value::Float(v) => out.add(v),
            Value::Text(v) => out.add(v),
            Value::Bytes(v) => out.add(v),
        };
        added.map_err(sqlx::Error::Encode)?;
    }
    Ok(out)
}

fn decode_column(row: &AnyRow, index: usize) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    let type_name = raw.type_info().name().to_owned();
    if raw.is_null() {
        return Ok(Value::Null(null_kind(&type_name)));
    }

    let decoded = match type_name.as_str() {
        "BOOLEAN" => <bool as Decode<Any>>::decode(raw).map(Value::Bool),
        "SMALLINT" => <i16 as Decode<Any>>::decode(raw).map(Value::from),
        "INTEGER" => <i32 as Decode<Any>>::decode(raw).map(Value::from),
        "BIGINT" => <i64 as Decode<Any>>::decode(raw).map(Value::Int),
        "REAL" => <f32 as Decode<Any>>::decode(raw).map(Value::from),
        "DOUBLE" => <f64 as Decode<Any>>::decode(raw).map(Value::Float),
        "TEXT" => <String as Decode<Any>>::decode(raw).map(Value::Text),
        "BLOB" => <Vec<u8> as Decode<Any>>::decode(raw).map(Value::Bytes),
        other => Err(format!("unsupported column type {other}").into()),
    };
    decoded.map_err(|source| sqlx::Error::ColumnDecode { index: format!("{index:?}"), source })
}

fn null_kind(type_name: &str) -> ValueKind {
    match type_name {
        "BOOLEAN" => ValueKind::Bool,
        "SMALLINT" | "INTEGER" | "BIGINT" => ValueKind::Int,
        "REAL" | "DOUBLE" => ValueKind::Float,
        "BLOB" => ValueKind::Bytes,
        _ => ValueKind::Text,
    }
}

// ============================================================================
// Database Struct
// ============================================================================

/// The main entry point for sequel.
///
/// `Database` owns a connection pool and the metadata cache shared by every statement
/// and transaction started from it. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Database {
    pub(crate) pool: AnyPool,
    pub(crate) mapper: Mapper,
}

impl Database {
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Connects with default settings, detecting the dialect from the URL scheme.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        DatabaseBuilder::new().connect(url).await
    }

    pub fn dialect(&self) -> Dialect {
        self.mapper.dialect()
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Starts a transaction sharing this database's metadata cache.
    pub async fn begin(&self) -> Result<Transaction, Error> {
        let tx = self.pool.begin().await?;
        Ok(Transaction::new(tx, self.mapper.clone()))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl Connection for Database {
    fn execute<'a>(&'a self, sql: &'a str, args: Vec<Value>) -> BoxFuture<'a, Result<ExecResult, Error>> {
        Box::pin(async move {
            let result = sqlx::query_with(sql, bind(args)?).execute(&self.pool).await?;
            Ok(result.into())
        })
    }

    fn query<'a>(&'a self, sql: &'a str, args: Vec<Value>) -> BoxFuture<'a, Result<Rows, Error>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await?;
            Rows::fetch(&mut conn, sql, args).await
        })
    }

    fn query_row<'a>(&'a self, sql: &'a str, args: Vec<Value>) -> BoxFuture<'a, Result<Option<Vec<Value>>, Error>> {
        Box::pin(async move {
            let row = sqlx::query_with(sql, bind(args)?).fetch_optional(&self.pool).await?;
            let values = row
                .map(|row| (0..row.len()).map(|i| decode_column(&row, i)).collect::<Result<Vec<_>, _>>())
                .transpose()?;
            Ok(values)
        })
    }
}

impl Queryable for Database {
    fn mapper(&self) -> &Mapper {
        &self.mapper
    }
}

// ============================================================================
// DatabaseBuilder Struct
// ============================================================================

/// Connection settings for [`Database`].
#[derive(Debug, Clone)]
pub struct DatabaseBuilder {
    max_connections: u32,
    strict: bool,
    dialect: Option<Dialect>,
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self { max_connections: 5, strict: true, dialect: None }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Disables strict column checks: result columns with no matching field are skipped.
    pub fn relaxed(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Overrides dialect detection from the URL scheme.
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub async fn connect(self, url: &str) -> Result<Database, Error> {
        let dialect = match self.dialect {
            Some(dialect) => dialect,
            None => Dialect::from_url(url)?,
        };
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(self.max_connections).connect(url).await?;
        debug!("connected to {dialect} database (max {} connections, strict: {})", self.max_connections, self.strict);
        Ok(Database { pool, mapper: Mapper::new(dialect).strict(self.strict) })
    }
}

// ============================================================================
// Test Double
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records every statement and answers from queued results.
    pub(crate) struct Recorder {
        mapper: Mapper,
        statements: Mutex<Vec<(String, Vec<Value>)>>,
        execs: Mutex<VecDeque<ExecResult>>,
        results: Mutex<VecDeque<Rows>>,
    }

    impl Recorder {
        pub(crate) fn new(dialect: Dialect) -> Self {
            Recorder {
                mapper: Mapper::new(dialect),
                statements: Mutex::default(),
                execs: Mutex::default(),
                results: Mutex::default(),
            }
        }

        pub(crate) fn relaxed(mut self) -> Self {
            self.mapper = self.mapper.strict(false);
            self
        }

        pub(crate) fn with_exec(self, result: ExecResult) -> Self {
            self.execs.lock().unwrap().push_back(result);
            self
        }

        pub(crate) fn with_rows(self, rows: Rows) -> Self {
            self.results.lock().unwrap().push_back(rows);
            self
        }

        pub(crate) fn statements(&self) -> Vec<(String, Vec<Value>)> {
            self.statements.lock().unwrap().clone()
        }

        pub(crate) fn last(&self) -> (String, Vec<Value>) {
            self.statements().pop().expect("no statement was executed")
        }
    }

    impl Connection for Recorder {
        fn execute<'a>(&'a self, sql: &'a str, args: Vec<Value>) -> BoxFuture<'a, Result<ExecResult, Error>> {
            self.statements.lock().unwrap().push((sql.to_owned(), args));
            let result = self.execs.lock().unwrap().pop_front().unwrap_or_default();
            Box::pin(async move { Ok(result) })
        }

        fn query<'a>(&'a self, sql: &'a str, args: Vec<Value>) -> BoxFuture<'a, Result<Rows, Error>> {
            self.statements.lock().unwrap().push((sql.to_owned(), args));
            let rows = self.results.lock().unwrap().pop_front().unwrap_or_default();
            Box::pin(async move { Ok(rows) })
        }
    }

    impl Queryable for Recorder {
        fn mapper(&self) -> &Mapper {
            &self.mapper
        }
    }
}
