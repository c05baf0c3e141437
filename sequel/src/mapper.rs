//! # Mapper Module
//!
//! Runs statements through a [`Connection`]: expands arguments, executes, and maps result
//! columns back onto records by name.
//!
//! [`Queryable`] puts the same operations on [`Database`](crate::Database) and
//! [`Transaction`](crate::Transaction) directly.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};

use crate::{
    database::{Connection, ExecResult, Rows},
    dialect::{Dialect, InsertRows},
    error::Error,
    expand::{Expander, Expansion},
    meta::{Field, MetadataCache, RecordMetadata},
    record::Record,
    value::{FromValue, ToParam, Value},
};

// ============================================================================
// Mapper Struct
// ============================================================================

/// Dialect, metadata cache and column-check mode for one database.
#[derive(Debug, Clone)]
pub struct Mapper {
    dialect: Dialect,
    cache: Arc<MetadataCache>,
    strict: bool,
}

impl Mapper {
    pub fn new(dialect: Dialect) -> Self {
        Self::with_cache(dialect, Arc::new(MetadataCache::new()))
    }

    pub fn with_cache(dialect: Dialect, cache: Arc<MetadataCache>) -> Self {
        Mapper { dialect, cache, strict: true }
    }

    /// In strict mode every result column must map onto a field and every field must be
    /// filled. Otherwise unmapped columns are skipped.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Expands `query` without touching the database. `**` becomes `*`.
    pub fn expand(&self, query: &str, args: &[&dyn ToParam]) -> Result<Expansion, Error> {
        Expander::new(self.dialect, &self.cache).expand(query, args)
    }

    /// Expands `query` with `**` taken from the record (or records) in `shape_source`.
    pub fn expand_as(&self, query: &str, shape_source: &dyn ToParam, args: &[&dyn ToParam]) -> Result<Expansion, Error> {
        let meta = self.cache.metadata_for_param(&shape_source.to_param())?;
        Expander::new(self.dialect, &self.cache).metadata(&meta).expand(query, args)
    }

    pub async fn exec<C>(&self, conn: &C, query: &str, args: &[&dyn ToParam]) -> Result<ExecResult, Error>
    where
        C: Connection + ?Sized,
    {
        let expansion = self.expand(query, args)?;
        debug!("exec: {}", expansion.sql);
        conn.execute(&expansion.sql, expansion.args).await
    }

    /// Runs a query and maps each row onto a fresh `T::default()`. `**` expands to the
    /// columns of `T`.
    pub async fn select<C, T>(&self, conn: &C, query: &str, args: &[&dyn ToParam]) -> Result<Vec<T>, Error>
    where
        C: Connection + ?Sized,
        T: Record + Default,
    {
        let (meta, mut rows, _) = self.prepare_select::<C, T>(conn, query, args).await?;
        let targets = self.map_columns(&meta, rows.columns())?;

        let mut out = Vec::with_capacity(rows.len());
        while let Some(row) = rows.next() {
            out.push(scan_row(&targets, row)?);
        }
        Ok(out)
    }

    /// As [`select`](Mapper::select), but exactly one row must come back.
    pub async fn select_one<C, T>(&self, conn: &C, query: &str, args: &[&dyn ToParam]) -> Result<T, Error>
    where
        C: Connection + ?Sized,
        T: Record + Default,
    {
        let (meta, mut rows, sql) = self.prepare_select::<C, T>(conn, query, args).await?;
        let targets = self.map_columns(&meta, rows.columns())?;

        if rows.len() > 1 {
            return Err(Error::TooManyRows { query: sql });
        }
        let row = rows.next().ok_or(Error::NoRows)?;
        scan_row(&targets, row)
    }

    /// First column of the first row.
    pub async fn select_scalar<C, V>(&self, conn: &C, query: &str, args: &[&dyn ToParam]) -> Result<V, Error>
    where
        C: Connection + ?Sized,
        V: FromValue,
    {
        let expansion = self.expand(query, args)?;
        debug!("select scalar: {}", expansion.sql);
        let row = conn.query_row(&expansion.sql, expansion.args).await?.ok_or(Error::NoRows)?;
        let value = row.into_iter().next().ok_or(Error::NoRows)?;
        V::from_value(value).map_err(|source| Error::Decode { column: "0".to_owned(), source })
    }

    /// Inserts rows, writing generated ids back into mutably passed rows.
    pub async fn insert<C, T>(&self, conn: &C, table: &str, rows: InsertRows<'_, T>) -> Result<Vec<i64>, Error>
    where
        C: Connection + ?Sized,
        T: Record,
    {
        self.dialect.insert(conn, &self.cache, table, rows).await
    }

    /// Inserts rows, updating every column of rows that conflict on `keys`. With no keys
    /// the primary key is used.
    pub async fn upsert<C, T>(&self, conn: &C, table: &str, keys: &[&str], rows: &[T]) -> Result<ExecResult, Error>
    where
        C: Connection + ?Sized,
        T: Record,
    {
        let meta = self.cache.metadata_for::<T>()?;
        let keys: Vec<&str> = match (keys, meta.primary_key()) {
            ([], Some(pk)) => vec![pk.name.as_str()],
            ([], None) => {
                return Err(Error::MissingConflictKey { table: table.to_owned(), record: meta.type_name() });
            }
            (keys, _) => keys.to_vec(),
        };
        if rows.is_empty() {
            return Ok(ExecResult::default());
        }

        let query = self.dialect.upsert(table, &keys, &meta);
        let expansion = Expander::new(self.dialect, &self.cache).expand(&query, &[&rows])?;
        debug!("upsert: {}", expansion.sql);
        conn.execute(&expansion.sql, expansion.args).await
    }

    async fn prepare_select<C, T>(
        &self,
        conn: &C,
        query: &str,
        args: &[&dyn ToParam],
    ) -> Result<(Arc<RecordMetadata>, Rows, String), Error>
    where
        C: Connection + ?Sized,
        T: Record,
    {
        let meta = self.cache.metadata_for::<T>()?;
        let expansion = Expander::new(self.dialect, &self.cache).metadata(&meta).expand(query, args)?;
        debug!("select {}: {}", meta.type_name(), expansion.sql);
        let rows = conn.query(&expansion.sql, expansion.args).await?;
        Ok((meta, rows, expansion.sql))
    }

    /// Resolves the field each result column is written to.
    fn map_columns<'m>(&self, meta: &'m RecordMetadata, columns: &[String]) -> Result<Vec<Option<&'m Field>>, Error> {
        let mapping = || {
            let fields: Vec<_> = meta.fields().iter().map(|f| f.name.as_str()).collect();
            format!("({}) -> ({})", columns.join(","), fields.join(","))
        };

        let mut targets = Vec::with_capacity(columns.len());
        for column in columns {
            match meta.field(column) {
                Some(field) => targets.push(Some(field)),
                None if self.strict => {
                    return Err(Error::ColumnMappingMismatch { column: column.clone(), mapping: mapping() });
                }
                None => {
                    warn!("no field of {} maps to result column {column:?}, skipping it", meta.type_name());
                    targets.push(None);
                }
            }
        }

        if self.strict {
            if let Some(unfilled) = meta.fields().iter().find(|f| !columns.contains(&f.name)) {
                return Err(Error::ColumnMappingMismatch { column: unfilled.name.clone(), mapping: mapping() });
            }
            if columns.len() != meta.fields().len() {
                let duplicate = columns.iter().enumerate().find(|(i, c)| columns[..*i].contains(*c));
                let column = duplicate.map(|(_, c)| c.clone()).unwrap_or_default();
                return Err(Error::ColumnMappingMismatch { column, mapping: mapping() });
            }
        }
        Ok(targets)
    }
}

fn scan_row<T: Record + Default>(targets: &[Option<&Field>], row: Vec<Value>) -> Result<T, Error> {
    let mut record = T::default();
    for (value, target) in row.into_iter().zip(targets) {
        if let Some(field) = target {
            record.scan_at(&field.path, value).map_err(|source| Error::Decode { column: field.name.clone(), source })?;
        }
    }
    Ok(record)
}

// ============================================================================
// Queryable Trait
// ============================================================================

/// Statement operations available on anything that can execute them.
#[async_trait]
pub trait Queryable: Connection {
    fn mapper(&self) -> &Mapper;

    fn expand(&self, query: &str, args: &[&dyn ToParam]) -> Result<Expansion, Error> {
        self.mapper().expand(query, args)
    }

    fn expand_as(&self, query: &str, shape_source: &dyn ToParam, args: &[&dyn ToParam]) -> Result<Expansion, Error> {
        self.mapper().expand_as(query, shape_source, args)
    }

    async fn exec(&self, query: &str, args: &[&dyn ToParam]) -> Result<ExecResult, Error> {
        self.mapper().exec(self, query, args).await
    }

    async fn select<T>(&self, query: &str, args: &[&dyn ToParam]) -> Result<Vec<T>, Error>
    where
        T: Record + Default,
    {
        self.mapper().select(self, query, args).await
    }

    async fn select_one<T>(&self, query: &str, args: &[&dyn ToParam]) -> Result<T, Error>
    where
        T: Record + Default,
    {
        self.mapper().select_one(self, query, args).await
    }

    async fn select_scalar<V>(&self, query: &str, args: &[&dyn ToParam]) -> Result<V, Error>
    where
        V: FromValue + Send,
    {
        self.mapper().select_scalar(self, query, args).await
    }

    async fn select_int(&self, query: &str, args: &[&dyn ToParam]) -> Result<i64, Error> {
        self.select_scalar(query, args).await
    }

    async fn select_string(&self, query: &str, args: &[&dyn ToParam]) -> Result<String, Error> {
        self.select_scalar(query, args).await
    }

    /// Inserts rows into `table`. Pass rows mutably when the record has a primary key.
    async fn insert<'r, T, R>(&self, table: &str, rows: R) -> Result<Vec<i64>, Error>
    where
        T: Record,
        R: Into<InsertRows<'r, T>> + Send,
    {
        let rows = rows.into();
        self.mapper().insert(self, table, rows).await
    }

    async fn upsert<T>(&self, table: &str, keys: &[&str], rows: &[T]) -> Result<ExecResult, Error>
    where
        T: Record,
    {
        self.mapper().upsert(self, table, keys, rows).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::Recorder;
    use crate::Record;

    #[derive(Record, Default, Debug, PartialEq)]
    struct User {
        #[db = "id,pk,managed"]
        id: i64,
        name: String,
        age: Option<i32>,
    }

    #[derive(Record, Default, Debug)]
    struct Tag {
        label: String,
    }

    fn user_rows(columns: &[&str], rows: Vec<Vec<Value>>) -> Rows {
        Rows::new(columns.iter().map(|c| (*c).to_owned()).collect(), rows)
    }

    #[tokio::test]
    async fn maps_columns_by_name() {
        let conn = Recorder::new(Dialect::Postgres).with_rows(user_rows(
            &["name", "age", "id"],
            vec![vec![Value::from("ann"), Value::Int(31), Value::Int(1)], vec![Value::from("bob"), Value::NULL, Value::Int(2)]],
        ));

        let users: Vec<User> = conn.select("SELECT ** FROM users WHERE id > ?", &[&0]).await.unwrap();
        assert_eq!(
            users,
            [
                User { id: 1, name: "ann".into(), age: Some(31) },
                User { id: 2, name: "bob".into(), age: None },
            ]
        );

        let (sql, args) = conn.last();
        assert_eq!(sql, r#"SELECT "id", "name", "age" FROM users WHERE id > $1"#);
        assert_eq!(args, [Value::Int(0)]);
    }

    #[tokio::test]
    async fn strict_mode_rejects_unmapped_columns() {
        let conn = Recorder::new(Dialect::Sqlite)
            .with_rows(user_rows(&["id", "name", "age", "email"], vec![]))
            .with_rows(user_rows(&["id", "name"], vec![]));

        let err = conn.select::<User>("SELECT * FROM users", &[]).await.unwrap_err();
        assert!(matches!(err, Error::ColumnMappingMismatch { ref column, .. } if column == "email"), "{err:?}");

        let err = conn.select::<User>("SELECT id, name FROM users", &[]).await.unwrap_err();
        assert!(matches!(err, Error::ColumnMappingMismatch { ref column, .. } if column == "age"), "{err:?}");
        assert!(err.to_string().contains("(id,name) -> (id,name,age)"), "{err}");
    }

    #[tokio::test]
    async fn strict_mode_rejects_duplicate_columns() {
        let conn = Recorder::new(Dialect::Sqlite).with_rows(user_rows(&["id", "name", "age", "name"], vec![]));
        let err = conn.select::<User>("SELECT id, name, age, name FROM users", &[]).await.unwrap_err();
        assert!(matches!(err, Error::ColumnMappingMismatch { ref column, .. } if column == "name"), "{err:?}");
    }

    #[tokio::test]
    async fn relaxed_mode_skips_unmapped_columns() {
        let _ = env_logger::builder().is_test(true).try_init();
        let conn = Recorder::new(Dialect::Sqlite)
            .relaxed()
            .with_rows(user_rows(&["name", "email"], vec![vec![Value::from("ann"), Value::from("a@x")]]));

        let users: Vec<User> = conn.select("SELECT name, email FROM users", &[]).await.unwrap();
        assert_eq!(users, [User { id: 0, name: "ann".into(), age: None }]);
    }

    #[tokio::test]
    async fn decode_failures_name_the_column() {
        let conn = Recorder::new(Dialect::Sqlite)
            .with_rows(user_rows(&["id", "name", "age"], vec![vec![Value::Int(1), Value::Int(5), Value::NULL]]));

        let err = conn.select::<User>("SELECT ** FROM users", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Decode { ref column, .. } if column == "name"), "{err:?}");
    }

    #[tokio::test]
    async fn empty_results_are_still_checked() {
        let conn = Recorder::new(Dialect::Sqlite)
            .with_rows(user_rows(&["id", "name", "age"], vec![]))
            .with_rows(user_rows(&["id", "extra"], vec![]));

        let users: Vec<User> = conn.select("SELECT ** FROM users", &[]).await.unwrap();
        assert!(users.is_empty());

        let err = conn.select::<User>("SELECT id, extra FROM users", &[]).await.unwrap_err();
        assert!(matches!(err, Error::ColumnMappingMismatch { ref column, .. } if column == "extra"), "{err:?}");
    }

    #[tokio::test]
    async fn select_one_wants_exactly_one_row() {
        let row = || vec![Value::Int(1), Value::from("ann"), Value::NULL];
        let conn = Recorder::new(Dialect::MySql)
            .with_rows(user_rows(&["id", "name", "age"], vec![row()]))
            .with_rows(user_rows(&["id", "name", "age"], vec![]))
            .with_rows(user_rows(&["id", "name", "age"], vec![row(), row()]));

        let user: User = conn.select_one("SELECT ** FROM users WHERE id = ?", &[&1]).await.unwrap();
        assert_eq!(user.name, "ann");

        let err = conn.select_one::<User>("SELECT ** FROM users WHERE id = ?", &[&2]).await.unwrap_err();
        assert!(matches!(err, Error::NoRows), "{err:?}");

        let err = conn.select_one::<User>("SELECT ** FROM users", &[]).await.unwrap_err();
        assert!(
            matches!(err, Error::TooManyRows { ref query } if query == "SELECT `id`, `name`, `age` FROM users"),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn selects_scalars() {
        let conn = Recorder::new(Dialect::Sqlite)
            .with_rows(user_rows(&["count"], vec![vec![Value::Int(3)]]))
            .with_rows(user_rows(&["name"], vec![vec![Value::from("ann")]]))
            .with_rows(Rows::default());

        assert_eq!(conn.select_int("SELECT COUNT(*) FROM users WHERE age > ?", &[&18]).await.unwrap(), 3);
        assert_eq!(conn.select_string("SELECT name FROM users LIMIT 1", &[]).await.unwrap(), "ann");
        assert!(matches!(conn.select_int("SELECT 1 WHERE 0", &[]).await, Err(Error::NoRows)));
    }

    #[tokio::test]
    async fn upsert_defaults_to_primary_key() {
        let conn = Recorder::new(Dialect::Sqlite).with_exec(ExecResult { rows_affected: 1, last_insert_id: Some(1) });
        let rows = [User { id: 1, name: "ann".into(), age: Some(3) }];

        conn.upsert("users", &[], &rows).await.unwrap();
        let (sql, args) = conn.last();
        assert_eq!(
            sql,
            "INSERT INTO `users` (`id`, `name`, `age`) VALUES (?, ?, ?) \
             ON CONFLICT (`id`) DO UPDATE SET `id` = EXCLUDED.`id`, `name` = EXCLUDED.`name`, `age` = EXCLUDED.`age`"
        );
        assert_eq!(args, [Value::Int(1), Value::from("ann"), Value::Int(3)]);
    }

    #[tokio::test]
    async fn upsert_needs_a_conflict_key() {
        let conn = Recorder::new(Dialect::Postgres);
        let rows = [Tag { label: "x".into() }];

        let err = conn.upsert("tags", &[], &rows).await.unwrap_err();
        assert!(matches!(err, Error::MissingConflictKey { ref table, .. } if table == "tags"), "{err:?}");

        conn.upsert("tags", &["label"], &rows).await.unwrap();
        assert!(conn.last().0.contains(r#"ON CONFLICT ("label") DO UPDATE SET "label" = EXCLUDED."label""#));
    }

    #[tokio::test]
    async fn inserts_through_the_trait() {
        let conn = Recorder::new(Dialect::Sqlite).with_exec(ExecResult { rows_affected: 2, last_insert_id: Some(2) });
        let mut users = vec![User { name: "a".into(), ..Default::default() }, User { name: "b".into(), ..Default::default() }];

        let ids = conn.insert("users", &mut users).await.unwrap();
        assert_eq!(ids, [1, 2]);
        assert_eq!(conn.last().0, "INSERT INTO `users` (`name`, `age`) VALUES (?, ?), (?, ?)");
    }

    #[test]
    fn expands_wildcards_from_an_argument() {
        let conn = Recorder::new(Dialect::MySql);
        let sample = User::default();

        let out = conn.expand_as("SELECT ** FROM users WHERE name = ?", &sample, &[&"ann"]).unwrap();
        assert_eq!(out.sql, "SELECT `id`, `name`, `age` FROM users WHERE name = ?");

        let out = conn.expand("SELECT ** FROM users", &[]).unwrap();
        assert_eq!(out.sql, "SELECT * FROM users");

        let err = conn.expand_as("SELECT ** FROM t", &7, &[]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedShape { .. }), "{err:?}");
    }
}
