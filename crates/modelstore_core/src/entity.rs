//! Entity types and their descriptors.
//!
//! A type becomes storable by implementing [`Persistable`]: it names its
//! collection, lists its fields, optionally designates one field as the
//! primary key, and converts itself to and from a [`Record`].
//!
//! ```rust,ignore
//! #[derive(Debug, Clone)]
//! struct Person {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl Persistable for Person {
//!     const COLLECTION: &'static str = "people";
//!     const FIELDS: &'static [&'static str] = &["id", "name"];
//!     const PRIMARY_KEY: Option<&'static str> = Some("id");
//!
//!     fn to_record(&self) -> Record {
//!         Record::new().with("id", self.id).with("name", self.name.as_str())
//!     }
//!
//!     fn from_record(record: &Record) -> CoreResult<Self> {
//!         Ok(Self {
//!             id: record.integer("id")?,
//!             name: record.text("name")?.to_string(),
//!         })
//!     }
//! }
//! ```

use crate::error::{CoreError, CoreResult};
use modelstore_codec::{Record, Value};

/// A model type that can be stored.
pub trait Persistable: Sized {
    /// Name of the collection holding records of this type.
    const COLLECTION: &'static str;

    /// Declared field names. Queries may only reference these.
    const FIELDS: &'static [&'static str];

    /// Field holding the primary key, if the type has one.
    const PRIMARY_KEY: Option<&'static str> = None;

    /// Converts this entity to its stored form.
    fn to_record(&self) -> Record;

    /// Rebuilds an entity from its stored form.
    fn from_record(record: &Record) -> CoreResult<Self>;

    /// Returns this type's descriptor.
    #[must_use]
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
    }
}

/// Read-only metadata derived from a [`Persistable`] type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    collection: &'static str,
    fields: &'static [&'static str],
    primary_key: Option<&'static str>,
}

impl EntityDescriptor {
    /// Builds the descriptor for `T`.
    #[must_use]
    pub fn of<T: Persistable>() -> Self {
        Self {
            collection: T::COLLECTION,
            fields: T::FIELDS,
            primary_key: T::PRIMARY_KEY,
        }
    }

    /// Returns the collection name.
    #[must_use]
    pub fn collection(&self) -> &'static str {
        self.collection
    }

    /// Returns the declared fields.
    #[must_use]
    pub fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    /// Returns the primary key field, if any.
    #[must_use]
    pub fn primary_key(&self) -> Option<&'static str> {
        self.primary_key
    }

    /// Returns whether the type declares a primary key.
    #[must_use]
    pub fn has_primary_key(&self) -> bool {
        self.primary_key.is_some()
    }

    /// Returns whether `name` is a declared field.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains(&name)
    }

    /// Returns the primary key value of `entity`.
    ///
    /// `None` when the type has no primary key or the value is null.
    #[must_use]
    pub fn primary_key_value<T: Persistable>(&self, entity: &T) -> Option<Value> {
        let field = self.primary_key?;
        entity
            .to_record()
            .remove(field)
            .filter(|value| !value.is_null())
    }

    /// Returns the primary key field, or fails for a type without one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] when no primary key is
    /// declared.
    pub fn require_primary_key(&self) -> CoreResult<&'static str> {
        self.primary_key.ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "`{}` declares no primary key; create_or_update needs one",
                self.collection
            ))
        })
    }

    /// Checks that the declaration is usable.
    pub(crate) fn validate(&self) -> CoreResult<()> {
        if self.collection.is_empty() {
            return Err(CoreError::invalid_operation("collection name is empty"));
        }
        if let Some(key) = self.primary_key {
            if !self.has_field(key) {
                return Err(CoreError::invalid_operation(format!(
                    "primary key `{key}` of `{}` is not a declared field",
                    self.collection
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Note {
        text: String,
    }

    impl Persistable for Note {
        const COLLECTION: &'static str = "notes";
        const FIELDS: &'static [&'static str] = &["text"];

        fn to_record(&self) -> Record {
            Record::new().with("text", self.text.as_str())
        }

        fn from_record(record: &Record) -> CoreResult<Self> {
            Ok(Self {
                text: record.text("text")?.to_string(),
            })
        }
    }

    struct Tag {
        id: Option<i64>,
    }

    impl Persistable for Tag {
        const COLLECTION: &'static str = "tags";
        const FIELDS: &'static [&'static str] = &["id"];
        const PRIMARY_KEY: Option<&'static str> = Some("id");

        fn to_record(&self) -> Record {
            Record::new().with("id", self.id)
        }

        fn from_record(record: &Record) -> CoreResult<Self> {
            Ok(Self {
                id: record.optional("id").and_then(Value::as_integer),
            })
        }
    }

    struct Broken;

    impl Persistable for Broken {
        const COLLECTION: &'static str = "broken";
        const FIELDS: &'static [&'static str] = &["name"];
        const PRIMARY_KEY: Option<&'static str> = Some("id");

        fn to_record(&self) -> Record {
            Record::new()
        }

        fn from_record(_: &Record) -> CoreResult<Self> {
            Ok(Self)
        }
    }

    #[test]
    fn descriptor_without_key() {
        let descriptor = Note::descriptor();
        assert_eq!(descriptor.collection(), "notes");
        assert!(!descriptor.has_primary_key());
        assert_eq!(
            descriptor.primary_key_value(&Note { text: "x".into() }),
            None
        );
        assert!(matches!(
            descriptor.require_primary_key(),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn descriptor_with_key() {
        let descriptor = Tag::descriptor();
        assert!(descriptor.has_primary_key());
        assert_eq!(
            descriptor.primary_key_value(&Tag { id: Some(3) }),
            Some(Value::Integer(3))
        );
        assert_eq!(descriptor.primary_key_value(&Tag { id: None }), None);
        assert_eq!(descriptor.require_primary_key().unwrap(), "id");
    }

    #[test]
    fn undeclared_key_field_fails_validation() {
        assert!(Note::descriptor().validate().is_ok());
        assert!(Broken::descriptor().validate().is_err());
    }
}
