use futures::future::BoxFuture;
use log::debug;
use tokio::sync::Mutex;

use crate::{
    database::{bind, Connection, ExecResult, Rows},
    error::Error,
    mapper::{Mapper, Queryable},
    value::Value,
};

/// A wrapper around a SQLx transaction.
///
/// Every [`Queryable`] operation is available inside the transaction and shares the
/// database's metadata cache. Dropping the transaction without committing rolls it back.
///
/// # Example
///
/// ```rust,ignore
/// let tx = db.begin().await?;
/// let result = async {
///     tx.insert("users", &mut users).await?;
///     tx.exec("UPDATE stats SET users = users + ?", &[&(users.len() as i64)]).await
/// }
/// .await;
/// tx.commit_or_rollback(result).await?;
/// ```
#[derive(Debug)]
pub struct Transaction {
    tx: Mutex<sqlx::Transaction<'static, sqlx::Any>>,
    mapper: Mapper,
}

impl Transaction {
    pub(crate) fn new(tx: sqlx::Transaction<'static, sqlx::Any>, mapper: Mapper) -> Self {
        Transaction { tx: Mutex::new(tx), mapper }
    }

    /// Persists all changes made during the transaction.
    pub async fn commit(self) -> Result<(), Error> {
        self.tx.into_inner().commit().await?;
        Ok(())
    }

    /// Reverts all changes made during the transaction.
    pub async fn rollback(self) -> Result<(), Error> {
        self.tx.into_inner().rollback().await?;
        Ok(())
    }

    /// Commits if `result` is `Ok`, otherwise rolls back and returns the original error.
    /// A failed rollback replaces the original error.
    pub async fn commit_or_rollback<T>(self, result: Result<T, Error>) -> Result<T, Error> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                debug!("rolling back transaction after error: {err}");
                self.rollback().await?;
                Err(err)
            }
        }
    }
}

impl Connection for Transaction {
    fn execute<'a>(&'a self, sql: &'a str, args: Vec<Value>) -> BoxFuture<'a, Result<ExecResult, Error>> {
        Box::pin(async move {
            let mut tx = self.tx.lock().await;
            let result = sqlx::query_with(sql, bind(args)?).execute(&mut **tx).await?;
            Ok(result.into())
        })
    }

    fn query<'a>(&'a self, sql: &'a str, args: Vec<Value>) -> BoxFuture<'a, Result<Rows, Error>> {
        Box::pin(async move {
            let mut tx = self.tx.lock().await;
            Rows::fetch(&mut tx, sql, args).await
        })
    }
}

impl Queryable for Transaction {
    fn mapper(&self) -> &Mapper {
        &self.mapper
    }
}
