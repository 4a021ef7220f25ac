//! CBOR encoding through `ciborium`.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes any serializable value to CBOR bytes.
///
/// Records keep their fields in a `BTreeMap`, so equal records always
/// produce equal bytes.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(value, &mut buffer)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buffer)
}

/// Decodes CBOR bytes into `T`.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the bytes are not valid CBOR
/// for `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}
