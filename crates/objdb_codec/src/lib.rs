//! # ObjDB Codec
//!
//! Property values and their on-disk encoding.
//!
//! Every property of an ObjDB record holds a [`Value`], a tagged variant
//! whose tag must match the [`PropertyType`] declared by the schema.
//! Primary keys are the hashable subset of values, [`PrimaryKey`].
//!
//! Persisted structures (WAL payloads, checkpoint images, the schema stored
//! in the manifest) are encoded as CBOR through `serde`.
//!
//! ```
//! use objdb_codec::{from_cbor, to_cbor, Value};
//!
//! let value = Value::Double(0.5);
//! let bytes = to_cbor(&value).unwrap();
//! let decoded: Value = from_cbor(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod key;
mod value;

pub use error::{CodecError, CodecResult};
pub use key::PrimaryKey;
pub use value::{PropertyType, Value};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes `value` as CBOR.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes a CBOR document into `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    if bytes.is_empty() {
        return Err(CodecError::UnexpectedEof);
    }
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}
