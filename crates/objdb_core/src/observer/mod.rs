//! Live observation of single records.
//!
//! [`Store::observe`](crate::Store::observe) returns an [`ObserverHandle`]
//! watching one `(type, key)` pair. After every commit that changes the
//! watched record, each live handle receives exactly one [`RecordChange`],
//! delivered synchronously on the committing thread before the next
//! transaction can begin. A key that does not exist is a normal state: the
//! handle reports `None` and is notified when the record appears.
//!
//! ```rust,ignore
//! let handle = store.observe("FeatureFlags", "enableExperimentalFeature1")?;
//! handle.on_change(|change| {
//!     if let Some(record) = change.record() {
//!         println!("now {}", record.get("value").unwrap());
//!     }
//! });
//! ```

mod handle;
mod hub;

pub use handle::ObserverHandle;
pub(crate) use hub::ObserverHub;

use crate::record::Record;

/// What happened to an observed record in one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordChange {
    /// The record did not exist before the commit.
    Created(Record),
    /// The record existed and at least one property changed.
    Modified {
        /// The record after the commit.
        record: Record,
        /// Properties whose values changed.
        changed_properties: Vec<String>,
    },
    /// The record no longer exists.
    Deleted,
}

impl RecordChange {
    /// Describes the transition from `before` to `after`, or `None` if the
    /// observable state did not change.
    #[must_use]
    pub fn between(before: Option<&Record>, after: Option<&Record>) -> Option<Self> {
        match (before, after) {
            (None, None) => None,
            (None, Some(after)) => Some(Self::Created(after.clone())),
            (Some(_), None) => Some(Self::Deleted),
            (Some(before), Some(after)) => {
                let changed_properties = before.changed_properties(after);
                if changed_properties.is_empty() {
                    None
                } else {
                    Some(Self::Modified {
                        record: after.clone(),
                        changed_properties,
                    })
                }
            }
        }
    }

    /// The record after the change, if it still exists.
    #[must_use]
    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Created(record) | Self::Modified { record, .. } => Some(record),
            Self::Deleted => None,
        }
    }

    /// Whether the record was deleted.
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

/// Lifecycle of an [`ObserverHandle`].
///
/// ```text
/// Unbound ──▶ Bound ◀──▶ Deleted
///    │          │           │
///    └──────────┴───────────┴──▶ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Created, nothing resolved or delivered yet.
    Unbound,
    /// The watched record exists.
    Bound,
    /// The watched record does not exist.
    Deleted,
    /// Dropped or the store was closed; no further notifications.
    Closed,
}

/// Identifies a callback registered with [`ObserverHandle::on_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

#[cfg(test)]
mod tests {
    use super::*;
    use objdb_codec::{PrimaryKey, Value};
    use std::collections::BTreeMap;

    fn flag(value: bool) -> Record {
        let mut props = BTreeMap::new();
        props.insert("name".to_string(), Value::from("f"));
        props.insert("value".to_string(), Value::Bool(value));
        Record::new("FeatureFlags", PrimaryKey::from("f"), props)
    }

    #[test]
    fn transitions() {
        let off = flag(false);
        let on = flag(true);

        assert_eq!(RecordChange::between(None, None), None);
        assert_eq!(
            RecordChange::between(None, Some(&on)),
            Some(RecordChange::Created(on.clone()))
        );
        assert_eq!(
            RecordChange::between(Some(&off), Some(&on)),
            Some(RecordChange::Modified {
                record: on.clone(),
                changed_properties: vec!["value".to_string()],
            })
        );
        assert_eq!(RecordChange::between(Some(&on), Some(&on)), None);
        assert_eq!(
            RecordChange::between(Some(&on), None),
            Some(RecordChange::Deleted)
        );
    }
}
