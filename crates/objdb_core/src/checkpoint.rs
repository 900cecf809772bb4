//! Checkpoint images.
//!
//! A checkpoint writes the full committed state to `snapshot.dat` so the
//! WAL can be truncated. The image is framed like the manifest:
//!
//! ```text
//! | magic "OSNP" (4) | version (2) | CBOR body (N) | crc32 (4) |
//! ```

use crate::collection::Snapshot;
use crate::error::{CoreError, CoreResult, SchemaError};
use crate::record::Record;
use crate::schema::{Fingerprint, SchemaRegistry};
use crate::types::{CollectionId, Generation};
use crate::wal::compute_crc32;
use objdb_codec::{from_cbor, to_cbor, PrimaryKey, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Magic bytes for checkpoint images.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"OSNP";

/// Current checkpoint image version.
pub const SNAPSHOT_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ImageCollection {
    type_name: String,
    records: Vec<(PrimaryKey, BTreeMap<String, Value>)>,
}

/// The serialized form of a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SnapshotImage {
    generation: Generation,
    bootstrapped: bool,
    fingerprint: Fingerprint,
    collections: Vec<ImageCollection>,
}

impl SnapshotImage {
    /// Captures `snapshot`, ordering records by key.
    pub(crate) fn capture(snapshot: &Snapshot, registry: &SchemaRegistry) -> Self {
        let collections = registry
            .iter()
            .map(|ty| {
                let mut records: Vec<_> = snapshot
                    .collection(ty.id())
                    .into_iter()
                    .flat_map(|c| c.iter())
                    .map(|r| (r.key().clone(), r.properties().clone()))
                    .collect();
                records.sort_by(|a, b| a.0.cmp(&b.0));
                ImageCollection {
                    type_name: ty.name().to_string(),
                    records,
                }
            })
            .collect();

        Self {
            generation: snapshot.generation(),
            bootstrapped: snapshot.bootstrapped(),
            fingerprint: registry.fingerprint(),
            collections,
        }
    }

    pub(crate) fn generation(&self) -> Generation {
        self.generation
    }

    /// Rebuilds the snapshot, checking that the image was written with the
    /// same schema.
    pub(crate) fn restore(self, registry: &SchemaRegistry) -> CoreResult<Snapshot> {
        if self.fingerprint != registry.fingerprint() {
            return Err(SchemaError::SchemaMismatch {
                stored: self.fingerprint.to_string(),
                requested: registry.fingerprint().to_string(),
            }
            .into());
        }

        let mut snapshot = Snapshot::empty(registry.len());
        for (index, collection) in self.collections.into_iter().enumerate() {
            let id = u32::try_from(index)
                .map(CollectionId::new)
                .map_err(|_| CoreError::invalid_format("too many collections in image"))?;
            let ty = registry.by_id(id).ok_or_else(|| {
                CoreError::invalid_format(format!("image has unknown collection {id}"))
            })?;
            if ty.name() != collection.type_name {
                return Err(CoreError::invalid_format(format!(
                    "image collection {id} holds {}, expected {}",
                    collection.type_name,
                    ty.name()
                )));
            }
            for (key, properties) in collection.records {
                snapshot.put(id, Record::new(ty.name(), key, properties));
            }
        }

        snapshot.set_generation(self.generation);
        if self.bootstrapped {
            snapshot.mark_bootstrapped();
        }
        Ok(snapshot)
    }

    /// Encodes the image to bytes.
    pub(crate) fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&SNAPSHOT_MAGIC);
        buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        buf.extend_from_slice(&to_cbor(self)?);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes an image, verifying magic, version and checksum.
    pub(crate) fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 10 {
            return Err(CoreError::invalid_format("checkpoint image too short"));
        }
        if data[0..4] != SNAPSHOT_MAGIC {
            return Err(CoreError::invalid_format("invalid checkpoint image magic"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > SNAPSHOT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported checkpoint image version: {version}"
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
    use crate::schema::SchemaDefinition;
    use objdb_codec::PropertyType;

    fn registry(value_type: PropertyType) -> SchemaRegistry {
        SchemaRegistry::register([SchemaDefinition::new("FeatureFlags", "name")
            .property("name", PropertyType::String)
            .property("value", value_type)])
        .unwrap()
    }

    fn populated(registry: &SchemaRegistry) -> Snapshot {
        let mut snapshot = Snapshot::empty(registry.len());
        for (name, value) in [("a", true), ("b", false)] {
            let mut props = BTreeMap::new();
            props.insert("name".to_string(), Value::from(name));
            props.insert("value".to_string(), Value::Bool(value));
            snapshot.put(
                CollectionId::new(0),
                Record::new("FeatureFlags", PrimaryKey::from(name), props),
            );
        }
        snapshot.set_generation(Generation::new(7));
        snapshot.mark_bootstrapped();
        snapshot
    }

    #[test]
    fn image_restores_state() {
        let registry = registry(PropertyType::Bool);
        let image = SnapshotImage::capture(&populated(&registry), &registry);
        let bytes = image.encode().unwrap();

        let restored = SnapshotImage::decode(&bytes)
            .unwrap()
            .restore(&registry)
            .unwrap();
        assert_eq!(restored.generation(), Generation::new(7));
        assert!(restored.bootstrapped());
        assert_eq!(
            restored
                .get(CollectionId::new(0), &PrimaryKey::from("a"))
                .and_then(|r| r.get("value")),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn corrupted_image_is_rejected() {
        let registry = registry(PropertyType::Bool);
        let mut bytes = SnapshotImage::capture(&populated(&registry), &registry)
            .encode()
            .unwrap();
        bytes[8] ^= 0x40;
        assert!(matches!(
            SnapshotImage::decode(&bytes),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn image_from_other_schema_is_a_mismatch() {
        let written = registry(PropertyType::Bool);
        let image = SnapshotImage::capture(&populated(&written), &written);
        let err = image.restore(&registry(PropertyType::Int)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Schema(SchemaError::SchemaMismatch { .. })
        ));
    }
}
