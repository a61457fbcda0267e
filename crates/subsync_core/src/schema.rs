//! Object type registry.
//!
//! Object types are described by data, not discovered at runtime. A session
//! builds a [`Schema`] up front and hands it to its
//! [`LocalDatabase`](crate::LocalDatabase); typed helpers such as
//! [`MutableSubscriptionSet::remove_all_of`](crate::MutableSubscriptionSet::remove_all_of)
//! resolve a Rust type to its object type through [`ObjectModel`] and then
//! check the registry.

use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;

/// A Rust type that maps onto a synchronized object type.
///
/// ```
/// use subsync_core::ObjectModel;
///
/// struct Person;
///
/// impl ObjectModel for Person {
///     const OBJECT_TYPE: &'static str = "Person";
/// }
/// ```
pub trait ObjectModel {
    /// Name of the object type on the server.
    const OBJECT_TYPE: &'static str;
}

/// Kind of a field in an object type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Boolean.
    Bool,
    /// 64-bit integer.
    Int,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Binary blob.
    Binary,
    /// Point in time.
    Timestamp,
    /// Primary-key object id.
    ObjectId,
    /// Link to another object type.
    Link(String),
    /// List of another kind.
    List(Box<FieldKind>),
}

/// A named field of an object type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Field kind.
    pub kind: FieldKind,
    /// Whether the field may be absent.
    pub optional: bool,
}

impl FieldDef {
    /// Creates a required field.
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
        }
    }

    /// Creates an optional field.
    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: true,
        }
    }
}

/// Description of one object type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSchema {
    name: String,
    fields: Vec<FieldDef>,
}

impl ObjectSchema {
    /// Creates an object type with no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Creates the object type for an [`ObjectModel`].
    #[must_use]
    pub fn of<T: ObjectModel>() -> Self {
        Self::new(T::OBJECT_TYPE)
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Returns the object type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Registry of the object types a session synchronizes.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    objects: BTreeMap<String, ObjectSchema>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an object type, replacing any earlier one with the same name.
    #[must_use]
    pub fn with_object(mut self, object: ObjectSchema) -> Self {
        self.objects.insert(object.name.clone(), object);
        self
    }

    /// Returns true if the schema contains the named object type.
    #[must_use]
    pub fn contains(&self, object_type: &str) -> bool {
        self.objects.contains_key(object_type)
    }

    /// Looks up an object type by name.
    #[must_use]
    pub fn object(&self, object_type: &str) -> Option<&ObjectSchema> {
        self.objects.get(object_type)
    }

    /// Resolves an [`ObjectModel`] to its registered object type name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownObjectType`] if `T` is not registered.
    pub fn object_type_of<T: ObjectModel>(&self) -> CoreResult<&str> {
        self.objects
            .get(T::OBJECT_TYPE)
            .map(|o| o.name())
            .ok_or_else(|| CoreError::unknown_object_type(T::OBJECT_TYPE))
    }

    /// Iterates object types in name order.
    pub fn objects(&self) -> impl Iterator<Item = &ObjectSchema> {
        self.objects.values()
    }

    /// Returns the number of object types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if no object types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
