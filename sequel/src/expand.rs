//! # Value Expander
//!
//! Rewrites statement text so every `?` becomes one or more dialect placeholders and
//! flattens the bound arguments into a positional list that lines up with them.
//!
//! - a scalar becomes a single placeholder
//! - a sequence becomes its elements joined by `, `
//! - a record becomes `(...)` around its mapped fields
//! - `**` becomes the quoted column list of the statement's record type, or `*`

use log::debug;

use crate::{
    dialect::Dialect,
    error::Error,
    lexer::{lex, Token},
    meta::{MetadataCache, RecordMetadata},
    value::{Param, ToParam, Value},
};

/// Expanded statement text and its flattened arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub sql: String,
    pub args: Vec<Value>,
}

/// Expands one statement at a time for a dialect.
#[derive(Debug, Clone, Copy)]
pub struct Expander<'a> {
    dialect: Dialect,
    cache: &'a MetadataCache,
    include_managed: bool,
    metadata: Option<&'a RecordMetadata>,
}

impl<'a> Expander<'a> {
    pub fn new(dialect: Dialect, cache: &'a MetadataCache) -> Self {
        Expander { dialect, cache, include_managed: true, metadata: None }
    }

    /// Whether managed fields appear in record expansions and `**`.
    pub fn include_managed(mut self, include: bool) -> Self {
        self.include_managed = include;
        self
    }

    /// Metadata `**` expands against.
    pub fn metadata(mut self, metadata: &'a RecordMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn expand(&self, query: &str, args: &[&dyn ToParam]) -> Result<Expansion, Error> {
        let mut out = Expansion { sql: String::with_capacity(query.len()), args: Vec::with_capacity(args.len()) };
        let mut next_arg = 0;

        for token in lex(query)? {
            match token {
                Token::Text(text) | Token::Quoted(text) => out.sql.push_str(text),
                Token::Wildcard => match self.metadata {
                    Some(meta) => {
                        let columns = meta.column_names(self.include_managed);
                        out.sql.push_str(&self.dialect.quote_and_join(&columns));
                    }
                    None => out.sql.push('*'),
                },
                Token::Placeholder => {
                    let arg = args
                        .get(next_arg)
                        .ok_or(Error::PlaceholderOutOfRange { ordinal: next_arg, available: args.len() })?;
                    self.expand_param(&mut out, arg.to_param())?;
                    next_arg += 1;
                }
            }
        }

        debug!("expanded {query:?} to {:?} with {} arguments", out.sql, out.args.len());
        Ok(out)
    }

    fn expand_param(&self, out: &mut Expansion, param: Param<'_>) -> Result<(), Error> {
        match param {
            Param::Value(value) => {
                out.sql.push_str(&self.dialect.placeholder(out.args.len()));
                out.args.push(value);
            }
            Param::Seq(items) => {
                for (i, item) in items.into_iter().enumerate() {
                    if i > 0 {
                        out.sql.push_str(", ");
                    }
                    self.expand_param(out, item)?;
                }
            }
            Param::Record(record) => {
                let meta = self.cache.metadata(record.record_shape())?;
                out.sql.push('(');
                for (i, field) in meta.filtered(self.include_managed).enumerate() {
                    if i > 0 {
                        out.sql.push_str(", ");
                    }
                    let value = record.param_at(&field.path).ok_or_else(|| {
                        Error::invalid_field(meta.type_name(), &field.name, "no value at the mapped member path")
                    })?;
                    self.expand_param(out, value)?;
                }
                out.sql.push(')');
            }
            Param::Unsupported(type_name) => {
                return Err(Error::UnsupportedParameter { type_name: type_name.to_owned() });
            }
        }
        Ok(())
    }
}
