//! Records: the stored form of one entity.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};

/// A named set of field values.
///
/// Entity types convert themselves to and from records; the store only
/// ever sees records. Fields are kept sorted by name.
///
/// The typed readers (`integer`, `text`, ...) are meant for
/// `Persistable::from_record` implementations and report a precise
/// [`CodecError`] when a field is missing or of the wrong kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets a field, returning the previous value if there was one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Looks up a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Looks up a field, treating an absent field as null.
    #[must_use]
    pub fn get_or_null(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.fields.get(name).unwrap_or(&NULL)
    }

    /// Removes a field.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates fields in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.fields.iter()
    }

    fn require(&self, name: &str) -> CodecResult<&Value> {
        self.fields
            .get(name)
            .ok_or_else(|| CodecError::missing_field(name))
    }

    fn mismatch(name: &str, expected: &'static str, found: &Value) -> CodecError {
        CodecError::TypeMismatch {
            field: name.to_string(),
            expected,
            found: found.kind(),
        }
    }

    /// Reads a required integer field.
    ///
    /// # Errors
    ///
    /// Fails if the field is missing or not an integer.
    pub fn integer(&self, name: &str) -> CodecResult<i64> {
        let value = self.require(name)?;
        value
            .as_integer()
            .ok_or_else(|| Self::mismatch(name, "integer", value))
    }

    /// Reads a required float field; integers widen.
    ///
    /// # Errors
    ///
    /// Fails if the field is missing or not numeric.
    pub fn float(&self, name: &str) -> CodecResult<f64> {
        let value = self.require(name)?;
        value
            .as_float()
            .ok_or_else(|| Self::mismatch(name, "float", value))
    }

    /// Reads a required boolean field.
    ///
    /// # Errors
    ///
    /// Fails if the field is missing or not a boolean.
    pub fn bool(&self, name: &str) -> CodecResult<bool> {
        let value = self.require(name)?;
        value
            .as_bool()
            .ok_or_else(|| Self::mismatch(name, "bool", value))
    }

    /// Reads a required text field.
    ///
    /// # Errors
    ///
    /// Fails if the field is missing or not text.
    pub fn text(&self, name: &str) -> CodecResult<&str> {
        let value = self.require(name)?;
        value
            .as_text()
            .ok_or_else(|| Self::mismatch(name, "text", value))
    }

    /// Reads a required bytes field.
    ///
    /// # Errors
    ///
    /// Fails if the field is missing or not a byte string.
    pub fn bytes(&self, name: &str) -> CodecResult<&[u8]> {
        let value = self.require(name)?;
        value
            .as_bytes()
            .ok_or_else(|| Self::mismatch(name, "bytes", value))
    }

    /// Reads a required nested record.
    ///
    /// # Errors
    ///
    /// Fails if the field is missing or not a map.
    pub fn map(&self, name: &str) -> CodecResult<&Record> {
        let value = self.require(name)?;
        value
            .as_map()
            .ok_or_else(|| Self::mismatch(name, "map", value))
    }

    /// Reads an optional field: `None` when absent or null.
    #[must_use]
    pub fn optional(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_readers() {
        let record = Record::new()
            .with("id", 4)
            .with("name", "four")
            .with("ratio", 0.25)
            .with("done", true);

        assert_eq!(record.integer("id").unwrap(), 4);
        assert_eq!(record.text("name").unwrap(), "four");
        assert_eq!(record.float("ratio").unwrap(), 0.25);
        assert_eq!(record.float("id").unwrap(), 4.0);
        assert!(record.bool("done").unwrap());
    }

    #[test]
    fn missing_and_mismatched_fields() {
        let record = Record::new().with("name", "x");

        assert_eq!(
            record.integer("id"),
            Err(CodecError::MissingField { field: "id".into() })
        );
        assert_eq!(
            record.integer("name"),
            Err(CodecError::TypeMismatch {
                field: "name".into(),
                expected: "integer",
                found: "text",
            })
        );
    }

    #[test]
    fn null_reads_as_absent() {
        let record = Record::new().with("nick", Value::Null);
        assert!(record.optional("nick").is_none());
        assert!(record.optional("other").is_none());
        assert!(record.get_or_null("other").is_null());
    }

    #[test]
    fn nested_maps() {
        let record = Record::new().with("owner", Record::new().with("id", 1));
        assert_eq!(record.map("owner").unwrap().integer("id").unwrap(), 1);
    }
}
