//! # modelstore codec
//!
//! The dynamic data model every persisted entity is mapped to, and its CBOR
//! encoding.
//!
//! - [`Value`]: one field value (primitive, text, bytes, list or nested map)
//! - [`Record`]: a named set of field values, i.e. one stored entity
//! - [`to_cbor`] / [`from_cbor`]: serde-driven encoding via `ciborium`
//!
//! ## Usage
//!
//! ```
//! use modelstore_codec::{from_cbor, to_cbor, Record, Value};
//!
//! let record = Record::new().with("id", 7).with("name", "seven");
//! let bytes = to_cbor(&record).unwrap();
//!
//! let decoded: Record = from_cbor(&bytes).unwrap();
//! assert_eq!(decoded.get("id"), Some(&Value::Integer(7)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod record;
mod value;

pub use cbor::{from_cbor, to_cbor};
pub use error::{CodecError, CodecResult};
pub use record::Record;
pub use value::Value;
