//! Derive macro for `sequel::Record`.

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod derive_record;
mod types;

/// Maps a struct's members onto columns.
///
/// Member attributes:
///
/// - `#[db = "name,pk,managed"]` renames the column and marks it as the primary key or as
///   populated by the database. An empty name keeps the snake_case member name.
/// - `#[db = "-"]` leaves the member unmapped.
/// - `#[db(flatten)]` inlines the columns of a nested record.
#[proc_macro_derive(Record, attributes(db))]
pub fn record_derive(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    derive_record::expand(ast).unwrap_or_else(syn::Error::into_compile_error).into()
}
