//! Store manifest for metadata storage.
//!
//! ```text
//! | magic "OMFN" (4) | version (2) | CBOR body (N) | crc32 (4) |
//! ```

use crate::error::{CoreError, CoreResult, SchemaError};
use crate::schema::{Fingerprint, SchemaDefinition, SchemaRegistry};
use crate::types::Generation;
use crate::wal::compute_crc32;
use objdb_codec::{from_cbor, to_cbor};
use serde::{Deserialize, Serialize};

/// Magic bytes for manifest file.
pub const MANIFEST_MAGIC: [u8; 4] = *b"OMFN";

/// Current manifest version.
pub const MANIFEST_VERSION: u16 = 1;

/// Store manifest containing metadata.
///
/// The manifest stores:
/// - Format version
/// - The schema the store was created with, and its fingerprint
/// - Whether the first-open seed has run
/// - Last checkpoint generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version (major, minor).
    pub format_version: (u16, u16),
    /// Fingerprint of `schema`.
    pub fingerprint: Fingerprint,
    /// Type definitions in declaration order.
    pub schema: Vec<SchemaDefinition>,
    /// Whether the bootstrap transaction has committed.
    pub bootstrapped: bool,
    /// Generation captured by the last checkpoint image.
    pub last_checkpoint: Option<Generation>,
}

impl Manifest {
    /// Creates the manifest of a new store.
    #[must_use]
    pub fn new(format_version: (u16, u16), registry: &SchemaRegistry) -> Self {
        Self {
            format_version,
            fingerprint: registry.fingerprint(),
            schema: registry.definitions(),
            bootstrapped: false,
            last_checkpoint: None,
        }
    }

    /// Verifies that the store can be opened with `registry`.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` for a newer major format, `SchemaMismatch` when the
    /// fingerprints differ.
    pub fn check(&self, format_version: (u16, u16), registry: &SchemaRegistry) -> CoreResult<()> {
        if self.format_version.0 != format_version.0 {
            return Err(CoreError::invalid_format(format!(
                "store format {}.{} is not readable by format {}.{}",
                self.format_version.0, self.format_version.1, format_version.0, format_version.1
            )));
        }
        if self.fingerprint != registry.fingerprint() {
            return Err(SchemaError::SchemaMismatch {
                stored: self.fingerprint.to_string(),
                requested: registry.fingerprint().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Rebuilds the registry recorded in the manifest.
    pub fn registry(&self) -> CoreResult<SchemaRegistry> {
        let registry = SchemaRegistry::register(self.schema.iter().cloned())?;
        if registry.fingerprint() != self.fingerprint {
            return Err(CoreError::invalid_format(
                "manifest schema does not match its fingerprint",
            ));
        }
        Ok(registry)
    }

    /// Encodes the manifest to bytes.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        buf.extend_from_slice(&to_cbor(self)?);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes a manifest from bytes.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 10 {
            return Err(CoreError::invalid_format("manifest too short"));
        }

        if data[0..4] != MANIFEST_MAGIC {
            return Err(CoreError::invalid_format("invalid manifest magic"));
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > MANIFEST_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported manifest version: {version}"
            )));
        }

        let (body, crc_bytes) = data.split_at(data.len() - 4);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let actual = compute_crc32(body);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        Ok(from_cbor(&body[6..])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objdb_codec::PropertyType;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::register([SchemaDefinition::new("FeatureFlags", "name")
            .property("name", PropertyType::String)
            .property("value", PropertyType::Bool)])
        .unwrap()
    }

    #[test]
    fn manifest_roundtrip() {
        let mut manifest = Manifest::new((1, 0), &registry());
        manifest.bootstrapped = true;
        manifest.last_checkpoint = Some(Generation::new(12));

        let decoded = Manifest::decode(&manifest.encode().unwrap()).unwrap();
        assert_eq!(decoded, manifest);
        assert_eq!(
            decoded.registry().unwrap().fingerprint(),
            registry().fingerprint()
        );
    }

    #[test]
    fn invalid_magic() {
        let data = b"XXXX\x01\x00\x00\x00\x00\x00";
        assert!(Manifest::decode(data).is_err());
    }

    #[test]
    fn different_schema_is_a_mismatch() {
        let manifest = Manifest::new((1, 0), &registry());
        let other = SchemaRegistry::register([SchemaDefinition::new("FeatureFlags", "name")
            .property("name", PropertyType::String)
            .property("value", PropertyType::Bool)
            .property("description", PropertyType::String)])
        .unwrap();

        assert!(manifest.check((1, 0), &registry()).is_ok());
        assert!(matches!(
            manifest.check((1, 0), &other),
            Err(CoreError::Schema(SchemaError::SchemaMismatch { .. }))
        ));
        assert!(matches!(
            manifest.check((2, 0), &registry()),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
