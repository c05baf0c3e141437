//! # Dialect Module
//!
//! Per-database differences: identifier quoting, placeholder syntax, upsert statements
//! and how generated ids are recovered after a multi-row insert.
//!
//! ```text
//! MySQL     `id`   ?     ON DUPLICATE KEY UPDATE   first id of the batch
//! Postgres  "id"   $1    ON CONFLICT (...)         RETURNING
//! SQLite    `id`   ?     ON CONFLICT (...)         last id of the batch
//! ```

use std::fmt;

use log::debug;

use crate::{
    database::Connection,
    error::Error,
    expand::Expander,
    meta::{MetadataCache, RecordMetadata},
    record::Record,
    value::{FromValue, Param, Value, ValueKind},
};

// ============================================================================
// Dialect Enum
// ============================================================================

/// Supported database dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    MySql,
    Postgres,
    Sqlite,
}

/// How the ids generated by an `INSERT` are recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdRecovery {
    /// The driver reports the id of the first inserted row.
    FirstOfBatch,
    /// The driver reports the id of the last inserted row.
    LastOfBatch,
    /// Ids are read back with `RETURNING`.
    Returning,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Looks up a dialect by driver name.
    pub fn from_name(name: &str) -> Result<Self, Error> {
        match name {
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            other => Err(Error::UnsupportedDriver(other.to_owned())),
        }
    }

    /// Detects the dialect from the scheme of a connection URL.
    pub fn from_url(url: &str) -> Result<Self, Error> {
        match url.split_once(':') {
            Some((scheme, _)) => Self::from_name(scheme),
            None => Err(Error::UnsupportedDriver(url.to_owned())),
        }
    }

    pub fn quote_id(self, id: &str) -> String {
        match self {
            Dialect::Postgres => format!("\"{}\"", id.replace('"', "\"\"")),
            Dialect::MySql | Dialect::Sqlite => format!("`{}`", id.replace('`', "``")),
        }
    }

    pub fn quote_and_join<S: AsRef<str>>(self, ids: &[S]) -> String {
        ids.iter().map(|id| self.quote_id(id.as_ref())).collect::<Vec<_>>().join(", ")
    }

    /// Placeholder for the zero-based positional argument `n`.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", n + 1),
            Dialect::MySql | Dialect::Sqlite => "?".to_owned(),
        }
    }

    pub fn id_recovery(self) -> IdRecovery {
        match self {
            Dialect::MySql => IdRecovery::FirstOfBatch,
            Dialect::Postgres => IdRecovery::Returning,
            Dialect::Sqlite => IdRecovery::LastOfBatch,
        }
    }

    /// Upsert statement with a single `?` for the rows. Every column, managed ones
    /// included, is inserted and updated.
    pub fn upsert(self, table: &str, keys: &[&str], meta: &RecordMetadata) -> String {
        let columns = meta.column_names(true);
        let insert = format!("INSERT INTO {} ({}) VALUES ?", self.quote_id(table), self.quote_and_join(&columns));

        match self {
            Dialect::MySql => {
                let set: Vec<_> = columns
                    .iter()
                    .map(|c| {
                        let q = self.quote_id(c);
                        format!("{q}=VALUES({q})")
                    })
                    .collect();
                format!("{insert} ON DUPLICATE KEY UPDATE {}", set.join(","))
            }
            Dialect::Postgres | Dialect::Sqlite => {
                let set: Vec<_> = columns
                    .iter()
                    .map(|c| {
                        let q = self.quote_id(c);
                        format!("{q} = EXCLUDED.{q}")
                    })
                    .collect();
                format!("{insert} ON CONFLICT ({}) DO UPDATE SET {}", self.quote_and_join(keys), set.join(", "))
            }
        }
    }

    /// Inserts `rows` into `table` and returns the generated ids in row order.
    ///
    /// When the record has a primary key the rows must be passed mutably and each
    /// row's key is set to its id. If the driver reports no id, nothing is written back
    /// and the returned list is empty.
    pub async fn insert<C, T>(
        self,
        conn: &C,
        cache: &MetadataCache,
        table: &str,
        mut rows: InsertRows<'_, T>,
    ) -> Result<Vec<i64>, Error>
    where
        C: Connection + ?Sized,
        T: Record,
    {
        let meta = cache.metadata_for::<T>()?;
        let count = rows.len();
        if count == 0 {
            return Ok(Vec::new());
        }

        let pk = meta.primary_key();
        if let (Some(pk), InsertRows::Shared(_)) = (pk, &rows) {
            return Err(Error::ImmutablePrimaryKeyTarget { record: meta.type_name(), column: pk.name.clone() });
        }
        // Generated ids are integers; checked on the first row before anything is written.
        if let (Some(pk), Some(first)) = (pk, rows.as_slice().first()) {
            if !takes_generated_id(first.param_at(&pk.path)) {
                return Err(Error::NonIntegerPrimaryKey { record: meta.type_name(), column: pk.name.clone() });
            }
        }

        let mut query = format!(
            "INSERT INTO {} ({}) VALUES ?",
            self.quote_id(table),
            self.quote_and_join(&meta.column_names(false))
        );
        let policy = self.id_recovery();
        if let (IdRecovery::Returning, Some(pk)) = (policy, pk) {
            query.push_str(" RETURNING ");
            query.push_str(&self.quote_id(&pk.name));
        }

        let expansion = Expander::new(self, cache).include_managed(false).expand(&query, &[&rows.as_slice()])?;
        debug!("{}: {}", self, expansion.sql);

        let ids = match (policy, pk) {
            (IdRecovery::Returning, Some(pk)) => {
                let mut result = conn.query(&expansion.sql, expansion.args).await?;
                if result.len() != count {
                    return Err(Error::RowCountMismatch { affected: result.len() as u64, expected: count });
                }
                let mut ids = Vec::with_capacity(count);
                while let Some(row) = result.next() {
                    let value = row.into_iter().next().unwrap_or(Value::NULL);
                    let id = i64::from_value(value)
                        .map_err(|source| Error::Decode { column: pk.name.clone(), source })?;
                    ids.push(id);
                }
                ids
            }
            _ => {
                let result = conn.execute(&expansion.sql, expansion.args).await?;
                if result.rows_affected != count as u64 {
                    return Err(Error::RowCountMismatch { affected: result.rows_affected, expected: count });
                }
                match result.last_insert_id {
                    Some(reported) => recover_ids(policy, reported, count),
                    None => Vec::new(),
                }
            }
        };

        if let (Some(pk), InsertRows::Exclusive(rows)) = (pk, &mut rows) {
            for (row, &id) in rows.iter_mut().zip(&ids) {
                row.scan_at(&pk.path, Value::Int(id))
                    .map_err(|source| Error::Decode { column: pk.name.clone(), source })?;
            }
        }
        Ok(ids)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn takes_generated_id(key: Option<Param<'_>>) -> bool {
    matches!(key, Some(Param::Value(Value::Int(_) | Value::Null(ValueKind::Int))))
}

/// Ids of `count` rows given the single id the driver reported.
///
/// MySQL allocates the auto-increment values of one multi-row `INSERT ... VALUES` as a
/// consecutive block under `innodb_autoinc_lock_mode` 0 and 1. `RETURNING` reads ids
/// back directly, so there is nothing to recover.
pub fn recover_ids(policy: IdRecovery, reported: i64, count: usize) -> Vec<i64> {
    let count = count as i64;
    match policy {
        IdRecovery::FirstOfBatch => (reported..reported + count).collect(),
        IdRecovery::LastOfBatch => (reported - count + 1..=reported).collect(),
        IdRecovery::Returning => Vec::new(),
    }
}

// ============================================================================
// Insert Rows
// ============================================================================

/// Rows handed to an insert. Generated keys can only be written back to
/// [`Exclusive`](InsertRows::Exclusive) rows.
#[derive(Debug)]
pub enum InsertRows<'r, T> {
    Shared(&'r [T]),
    Exclusive(&'r mut [T]),
}

impl<T> InsertRows<'_, T> {
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[T] {
        match self {
            InsertRows::Shared(rows) => rows,
            InsertRows::Exclusive(rows) => rows,
        }
    }
}

impl<'r, T> From<&'r [T]> for InsertRows<'r, T> {
    fn from(rows: &'r [T]) -> Self {
        InsertRows::Shared(rows)
    }
}

impl<'r, T> From<&'r Vec<T>> for InsertRows<'r, T> {
    fn from(rows: &'r Vec<T>) -> Self {
        InsertRows::Shared(rows)
    }
}

impl<'r, T, const N: usize> From<&'r [T; N]> for InsertRows<'r, T> {
    fn from(rows: &'r [T; N]) -> Self {
        InsertRows::Shared(rows)
    }
}

impl<'r, T> From<&'r mut [T]> for InsertRows<'r, T> {
    fn from(rows: &'r mut [T]) -> Self {
        InsertRows::Exclusive(rows)
    }
}

impl<'r, T> From<&'r mut Vec<T>> for InsertRows<'r, T> {
    fn from(rows: &'r mut Vec<T>) -> Self {
        InsertRows::Exclusive(rows)
    }
}

impl<'r, T, const N: usize> From<&'r mut [T; N]> for InsertRows<'r, T> {
    fn from(rows: &'r mut [T; N]) -> Self {
        InsertRows::Exclusive(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::Recorder;
    use crate::database::{ExecResult, Rows};
    use crate::Record;

    #[derive(Record, Default, Debug, PartialEq)]
    struct User {
        #[db = "id,pk,managed"]
        id: i64,
        name: String,
        #[db = ",managed"]
        created: Option<String>,
    }

    #[derive(Record, Default)]
    struct Event {
        kind: String,
    }

    #[derive(Record, Default)]
    struct Setting {
        #[db = "key,pk"]
        key: String,
        value: String,
    }

    #[derive(Record, Default)]
    struct Ticket {
        #[db = "id,pk,managed"]
        id: Option<u64>,
        title: String,
    }

    fn users(names: &[&str]) -> Vec<User> {
        names.iter().map(|n| User { name: (*n).into(), ..Default::default() }).collect()
    }

    #[test]
    fn detects_dialect_from_url() {
        assert_eq!(Dialect::from_url("postgres://localhost/db").unwrap(), Dialect::Postgres);
        assert_eq!(Dialect::from_url("postgresql://localhost/db").unwrap(), Dialect::Postgres);
        assert_eq!(Dialect::from_url("mysql://root@localhost/db").unwrap(), Dialect::MySql);
        assert_eq!(Dialect::from_url("sqlite::memory:").unwrap(), Dialect::Sqlite);
        assert!(matches!(Dialect::from_url("oracle://x"), Err(Error::UnsupportedDriver(d)) if d == "oracle"));
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(Dialect::MySql.quote_id("a`b"), "`a``b`");
        assert_eq!(Dialect::Sqlite.quote_id("name"), "`name`");
        assert_eq!(Dialect::Postgres.quote_id("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::Postgres.quote_and_join(&["a", "b"]), "\"a\", \"b\"");
    }

    #[test]
    fn numbers_postgres_placeholders() {
        assert_eq!(Dialect::Postgres.placeholder(0), "$1");
        assert_eq!(Dialect::Postgres.placeholder(9), "$10");
        assert_eq!(Dialect::MySql.placeholder(3), "?");
    }

    #[test]
    fn recovers_consecutive_ids() {
        assert_eq!(recover_ids(IdRecovery::FirstOfBatch, 10, 3), [10, 11, 12]);
        assert_eq!(recover_ids(IdRecovery::LastOfBatch, 12, 3), [10, 11, 12]);
        assert!(recover_ids(IdRecovery::Returning, 12, 3).is_empty());
    }

    #[test]
    fn builds_upserts() {
        let cache = MetadataCache::new();
        let meta = cache.metadata_for::<User>().unwrap();

        assert_eq!(
            Dialect::MySql.upsert("users", &["id"], &meta),
            "INSERT INTO `users` (`id`, `name`, `created`) VALUES ? \
             ON DUPLICATE KEY UPDATE `id`=VALUES(`id`),`name`=VALUES(`name`),`created`=VALUES(`created`)"
        );
        assert_eq!(
            Dialect::Postgres.upsert("users", &["id"], &meta),
            "INSERT INTO \"users\" (\"id\", \"name\", \"created\") VALUES ? \
             ON CONFLICT (\"id\") DO UPDATE SET \"id\" = EXCLUDED.\"id\", \"name\" = EXCLUDED.\"name\", \
             \"created\" = EXCLUDED.\"created\""
        );
    }

    #[tokio::test]
    async fn mysql_ids_count_up_from_first() {
        let conn = Recorder::new(Dialect::MySql).with_exec(ExecResult { rows_affected: 3, last_insert_id: Some(10) });
        let cache = MetadataCache::new();
        let mut rows = users(&["a", "b", "c"]);

        let ids = Dialect::MySql.insert(&conn, &cache, "users", (&mut rows).into()).await.unwrap();
        assert_eq!(ids, [10, 11, 12]);
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), [10, 11, 12]);

        let (sql, args) = conn.last();
        assert_eq!(sql, "INSERT INTO `users` (`name`) VALUES (?), (?), (?)");
        assert_eq!(args, [Value::from("a"), Value::from("b"), Value::from("c")]);
    }

    #[tokio::test]
    async fn sqlite_ids_count_back_from_last() {
        let conn = Recorder::new(Dialect::Sqlite).with_exec(ExecResult { rows_affected: 2, last_insert_id: Some(8) });
        let cache = MetadataCache::new();
        let mut rows = users(&["a", "b"]);

        let ids = Dialect::Sqlite.insert(&conn, &cache, "users", (&mut rows).into()).await.unwrap();
        assert_eq!(ids, [7, 8]);
        assert_eq!(rows[0].id, 7);
        assert_eq!(rows[1].id, 8);
    }

    #[tokio::test]
    async fn postgres_reads_ids_back() {
        let conn = Recorder::new(Dialect::Postgres)
            .with_rows(Rows::new(vec!["id".into()], vec![vec![Value::Int(4)], vec![Value::Int(5)]]));
        let cache = MetadataCache::new();
        let mut rows = users(&["a", "b"]);

        let ids = Dialect::Postgres.insert(&conn, &cache, "users", (&mut rows).into()).await.unwrap();
        assert_eq!(ids, [4, 5]);
        assert_eq!(rows[1].id, 5);

        let (sql, _) = conn.last();
        assert_eq!(sql, "INSERT INTO \"users\" (\"name\") VALUES ($1), ($2) RETURNING \"id\"");
    }

    #[tokio::test]
    async fn postgres_without_key_executes() {
        let conn = Recorder::new(Dialect::Postgres).with_exec(ExecResult { rows_affected: 1, last_insert_id: None });
        let cache = MetadataCache::new();
        let rows = [Event { kind: "login".into() }];

        let ids = Dialect::Postgres.insert(&conn, &cache, "events", (&rows).into()).await.unwrap();
        assert!(ids.is_empty());
        assert_eq!(conn.last().0, "INSERT INTO \"events\" (\"kind\") VALUES ($1)");
    }

    #[tokio::test]
    async fn rejects_affected_row_mismatch() {
        let conn = Recorder::new(Dialect::MySql).with_exec(ExecResult { rows_affected: 1, last_insert_id: Some(1) });
        let cache = MetadataCache::new();
        let mut rows = users(&["a", "b"]);

        let err = Dialect::MySql.insert(&conn, &cache, "users", (&mut rows).into()).await.unwrap_err();
        assert!(matches!(err, Error::RowCountMismatch { affected: 1, expected: 2 }), "{err:?}");
        assert_eq!(rows[0].id, 0);
    }

    #[tokio::test]
    async fn shared_rows_with_key_fail_before_executing() {
        let conn = Recorder::new(Dialect::Sqlite);
        let cache = MetadataCache::new();
        let rows = users(&["a"]);

        let err = Dialect::Sqlite.insert(&conn, &cache, "users", (&rows).into()).await.unwrap_err();
        assert!(matches!(err, Error::ImmutablePrimaryKeyTarget { ref column, .. } if column == "id"), "{err:?}");
        assert!(conn.statements().is_empty());
    }

    #[tokio::test]
    async fn text_keys_fail_before_executing() {
        let conn = Recorder::new(Dialect::Sqlite).with_exec(ExecResult { rows_affected: 1, last_insert_id: Some(1) });
        let cache = MetadataCache::new();
        let mut rows = [Setting { key: "theme".into(), value: "dark".into() }];

        let err = Dialect::Sqlite.insert(&conn, &cache, "settings", (&mut rows).into()).await.unwrap_err();
        assert!(matches!(err, Error::NonIntegerPrimaryKey { ref column, .. } if column == "key"), "{err:?}");
        assert!(conn.statements().is_empty());
        assert_eq!(rows[0].key, "theme");
    }

    #[tokio::test]
    async fn optional_integer_keys_take_ids() {
        let conn = Recorder::new(Dialect::MySql).with_exec(ExecResult { rows_affected: 2, last_insert_id: Some(3) });
        let cache = MetadataCache::new();
        let mut rows = [Ticket { title: "a".into(), ..Default::default() }, Ticket { title: "b".into(), ..Default::default() }];

        let ids = Dialect::MySql.insert(&conn, &cache, "tickets", (&mut rows).into()).await.unwrap();
        assert_eq!(ids, [3, 4]);
        assert_eq!(rows[1].id, Some(4));
    }

    #[tokio::test]
    async fn missing_insert_id_leaves_rows_untouched() {
        let conn = Recorder::new(Dialect::MySql).with_exec(ExecResult { rows_affected: 1, last_insert_id: None });
        let cache = MetadataCache::new();
        let mut rows = users(&["a"]);

        let ids = Dialect::MySql.insert(&conn, &cache, "users", (&mut rows).into()).await.unwrap();
        assert!(ids.is_empty());
        assert_eq!(rows[0].id, 0);
    }

    #[tokio::test]
    async fn empty_insert_is_a_no_op() {
        let conn = Recorder::new(Dialect::MySql);
        let cache = MetadataCache::new();
        let mut rows: Vec<User> = Vec::new();

        let ids = Dialect::MySql.insert(&conn, &cache, "users", (&mut rows).into()).await.unwrap();
        assert!(ids.is_empty());
        assert!(conn.statements().is_empty());
    }
}
