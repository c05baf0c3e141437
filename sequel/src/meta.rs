//! # Record Metadata
//!
//! Derives the ordered column list of a record shape once and caches it for the lifetime
//! of the owning [`MetadataCache`]. Embedded records are flattened in place; tags
//! override column names and mark primary keys and database-managed columns.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use heck::ToSnakeCase;
use log::debug;

use crate::{
    error::Error,
    record::{FieldKind, Record, Shape},
    value::Param,
};

/// One mapped column of a record shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// The column name.
    pub name: String,
    /// Member indexes from the outer record down through embedded records.
    pub path: Vec<usize>,
    pub primary_key: bool,
    /// Populated by the database; left out of insert column lists.
    pub managed: bool,
}

/// Column metadata for one record shape. Immutable once derived.
#[derive(Debug)]
pub struct RecordMetadata {
    type_name: &'static str,
    fields: Vec<Field>,
    by_name: HashMap<String, usize>,
    primary_key: Option<usize>,
}

impl RecordMetadata {
    /// Flattens and validates the member descriptors of `shape`.
    pub fn derive(shape: Shape) -> Result<Self, Error> {
        let record = shape.type_name();
        let mut fields = Vec::new();
        collect_fields(shape, &[], &mut fields)?;

        let mut by_name = HashMap::with_capacity(fields.len());
        let mut primary_key = None;
        for (i, field) in fields.iter().enumerate() {
            if by_name.insert(field.name.clone(), i).is_some() {
                return Err(Error::invalid_field(record, &field.name, "duplicate column name"));
            }
            if field.primary_key {
                if let Some(first) = primary_key.replace(i) {
                    let first: &Field = &fields[first];
                    return Err(Error::invalid_field(
                        record,
                        &field.name,
                        format!("second primary key, {:?} is already marked pk", first.name),
                    ));
                }
            }
        }

        Ok(RecordMetadata { type_name: record, fields, by_name, primary_key })
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn primary_key(&self) -> Option<&Field> {
        self.primary_key.map(|i| &self.fields[i])
    }

    /// Fields in order, skipping managed ones unless `include_managed`.
    pub fn filtered(&self, include_managed: bool) -> impl Iterator<Item = &Field> + '_ {
        self.fields.iter().filter(move |f| include_managed || !f.managed)
    }

    pub fn column_names(&self, include_managed: bool) -> Vec<&str> {
        self.filtered(include_managed).map(|f| f.name.as_str()).collect()
    }
}

fn collect_fields(shape: Shape, prefix: &[usize], out: &mut Vec<Field>) -> Result<(), Error> {
    let record = shape.type_name();
    for (i, spec) in shape.field_specs().into_iter().enumerate() {
        if spec.tag == Some("-") {
            continue;
        }
        let mut path = prefix.to_vec();
        path.push(i);

        match spec.kind {
            FieldKind::Embedded(inner) => collect_fields(inner(), &path, out)?,
            FieldKind::Nested(ty) => {
                return Err(Error::invalid_field(
                    record,
                    spec.member,
                    format!("record type {ty} must be flattened or map onto a single column"),
                ));
            }
            FieldKind::Sequence(ty) => {
                return Err(Error::invalid_field(record, spec.member, format!("can't map sequence type {ty}")));
            }
            FieldKind::Column => {
                let member = spec.member.strip_prefix("r#").unwrap_or(spec.member);
                let mut field = Field { name: member.to_snake_case(), path, primary_key: false, managed: false };
                if let Some(tag) = spec.tag {
                    apply_tag(record, spec.member, tag, &mut field)?;
                }
                out.push(field);
            }
        }
    }
    Ok(())
}

/// Applies a `name,attr,attr...` tag. Recognised attributes are `managed` and `pk`.
fn apply_tag(record: &'static str, member: &str, tag: &str, field: &mut Field) -> Result<(), Error> {
    let mut parts = tag.split(',').map(str::trim);
    if let Some(name) = parts.next().filter(|n| !n.is_empty()) {
        field.name = name.to_owned();
    }
    for attr in parts {
        match attr {
            "managed" => field.managed = true,
            "pk" => field.primary_key = true,
            other => return Err(Error::invalid_field(record, member, format!("invalid tag attribute {other:?}"))),
        }
    }
    Ok(())
}

// ============================================================================
// Metadata Cache
// ============================================================================

/// Shape → metadata map shared by every statement run through one database handle.
///
/// Lookups take a shared lock. A miss takes the exclusive lock, checks again and derives
/// the entry while holding it, so each shape is derived once. Failed derivations are not
/// cached.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: RwLock<HashMap<TypeId, Arc<RecordMetadata>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(&self, shape: Shape) -> Result<Arc<RecordMetadata>, Error> {
        let key = shape.type_id();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(meta) = entries.get(&key) {
                return Ok(Arc::clone(meta));
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(meta) = entries.get(&key) {
            return Ok(Arc::clone(meta));
        }
        let meta = Arc::new(RecordMetadata::derive(shape)?);
        debug!("derived metadata for {}: {:?}", meta.type_name(), meta.column_names(true));
        entries.insert(key, Arc::clone(&meta));
        Ok(meta)
    }

    pub fn metadata_for<T: Record>(&self) -> Result<Arc<RecordMetadata>, Error> {
        self.metadata(T::shape())
    }

    /// Metadata for a record argument, or for the first element of a sequence of records.
    pub fn metadata_for_param(&self, param: &Param<'_>) -> Result<Arc<RecordMetadata>, Error> {
        match param {
            Param::Record(record) => self.metadata(record.record_shape()),
            Param::Seq(items) => match items.first() {
                Some(first @ Param::Record(_)) => self.metadata_for_param(first),
                Some(other) => Err(Error::UnsupportedShape { type_name: format!("sequence of {}", describe(other)) }),
                None => Err(Error::UnsupportedShape { type_name: "empty sequence".to_owned() }),
            },
            other => Err(Error::UnsupportedShape { type_name: describe(other) }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn describe(param: &Param<'_>) -> String {
    match param {
        Param::Value(v) => format!("{} value", v.kind()),
        Param::Seq(_) => "sequence".to_owned(),
        Param::Record(r) => r.record_shape().type_name().to_owned(),
        Param::Unsupported(ty) => (*ty).to_owned(),
    }
}
