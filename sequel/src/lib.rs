//! # Sequel
//!
//! A thin mapping layer over sqlx. Queries are written as plain SQL with two extensions:
//!
//! - `?` binds an argument, expanding records to `(...)` groups and sequences to
//!   comma-separated lists
//! - `**` expands to the quoted column list of the record being selected
//!
//! Results are mapped back onto `#[derive(Record)]` structs by column name.
//!
//! ```rust,ignore
//! use sequel::{Database, Queryable, Record};
//!
//! #[derive(Record, Default)]
//! struct User {
//!     #[db = "id,pk,managed"]
//!     id: i64,
//!     name: String,
//! }
//!
//! let db = Database::connect("sqlite::memory:").await?;
//! let mut users = vec![User { id: 0, name: "ann".into() }, User { id: 0, name: "bob".into() }];
//! db.insert("users", &mut users).await?;
//! let found: Vec<User> = db.select("SELECT ** FROM users WHERE name IN (?)", &[&["ann", "bob"]]).await?;
//! ```

extern crate self as sequel;

pub mod database;
pub mod dialect;
pub mod error;
pub mod expand;
pub mod lexer;
pub mod mapper;
pub mod meta;
pub mod record;
pub mod transaction;
pub mod value;

pub use sequel_macro::Record;

pub use database::{Connection, Database, DatabaseBuilder, ExecResult, Rows};
pub use dialect::{Dialect, IdRecovery, InsertRows};
pub use error::{DecodeError, Error};
pub use expand::{Expander, Expansion};
pub use lexer::{lex, Token};
pub use mapper::{Mapper, Queryable};
pub use meta::{Field, MetadataCache, RecordMetadata};
pub use record::{FieldKind, FieldSpec, Record, Shape};
pub use transaction::Transaction;
pub use value::{byte_param, FromValue, Param, ToParam, Value, ValueKind};
