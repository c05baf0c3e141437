//! # Records
//!
//! A record is a struct whose members map onto columns. The [`Record`] trait is the
//! capability the metadata cache, the expander and the row scanner work through; it is
//! normally implemented with `#[derive(Record)]`.

use std::any::{type_name, TypeId};
use std::fmt;

use crate::{
    error::DecodeError,
    value::{Param, ToParam, Value},
};

/// A struct whose members map onto columns.
///
/// # Example
///
/// ```rust,ignore
/// use sequel::Record;
///
/// #[derive(Record, Default)]
/// struct User {
///     #[db = "id,pk,managed"]
///     id: i64,
///     name: String,
///     #[db(flatten)]
///     contact: Contact,
///     #[db = "-"]
///     cached: Option<String>,
/// }
/// ```
pub trait Record: ToParam + 'static {
    /// Raw member descriptors in declaration order. Validated and flattened by
    /// [`RecordMetadata::derive`](crate::RecordMetadata::derive).
    fn field_specs() -> Vec<FieldSpec>
    where
        Self: Sized;

    fn shape() -> Shape
    where
        Self: Sized,
    {
        Shape::of::<Self>()
    }

    /// The shape of the concrete type behind a `dyn Record`.
    fn record_shape(&self) -> Shape;

    /// The value of the member at `path`, where each step indexes into
    /// [`field_specs`](Record::field_specs) of the record at that depth.
    fn param_at(&self, path: &[usize]) -> Option<Param<'_>>;

    /// Assign a result value to the member at `path`.
    fn scan_at(&mut self, path: &[usize], value: Value) -> Result<(), DecodeError>;
}

/// Type identity of a record plus the way to describe its members.
#[derive(Clone, Copy)]
pub struct Shape {
    type_id: TypeId,
    type_name: &'static str,
    fields: fn() -> Vec<FieldSpec>,
}

impl Shape {
    pub fn of<T: Record>() -> Self {
        Shape { type_id: TypeId::of::<T>(), type_name: type_name::<T>(), fields: T::field_specs }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn field_specs(&self) -> Vec<FieldSpec> {
        (self.fields)()
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shape").field(&self.type_name).finish()
    }
}

impl PartialEq for Shape {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

/// One declared member of a record, before validation.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Member name as declared, possibly with a `r#` prefix.
    pub member: &'static str,
    /// Mapping tag, `name,attr,attr...`.
    pub tag: Option<&'static str>,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// Maps onto a single column.
    Column,
    /// A record whose fields are inlined into the parent.
    Embedded(fn() -> Shape),
    /// A named record member that does not map onto a single column.
    Nested(&'static str),
    /// A collection member.
    Sequence(&'static str),
}

impl FieldSpec {
    pub const fn column(member: &'static str, tag: Option<&'static str>) -> Self {
        FieldSpec { member, tag, kind: FieldKind::Column }
    }

    pub const fn embedded(member: &'static str, tag: Option<&'static str>, shape: fn() -> Shape) -> Self {
        FieldSpec { member, tag, kind: FieldKind::Embedded(shape) }
    }

    pub const fn nested(member: &'static str, tag: Option<&'static str>, type_name: &'static str) -> Self {
        FieldSpec { member, tag, kind: FieldKind::Nested(type_name) }
    }

    pub const fn sequence(member: &'static str, tag: Option<&'static str>, type_name: &'static str) -> Self {
        FieldSpec { member, tag, kind: FieldKind::Sequence(type_name) }
    }
}
