//! Typed access to the control record and scanner checkpoints held in the
//! property store.
//!
//! An absent property is a cold start; a property that does not decode is
//! fatal ([`SyncError::CheckpointCorrupt`]) so queued work is never dropped
//! silently.

use dubsync_core::control::{checkpoint_property, CONTROL_PROPERTY};
use dubsync_core::{Checkpoint, ControlRecord, PropertyStore};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SyncError;

fn load<T: DeserializeOwned>(props: &dyn PropertyStore, key: &str) -> Result<Option<T>, SyncError> {
    let Some(raw) = props.get(key)? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| SyncError::CheckpointCorrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

fn save<T: Serialize>(props: &dyn PropertyStore, key: &str, value: &T) -> Result<(), SyncError> {
    props.set(key, &serde_json::to_string(value)?)?;
    Ok(())
}

/// The driver control record; defaults when never written.
pub fn load_control(props: &dyn PropertyStore) -> Result<ControlRecord, SyncError> {
    Ok(load(props, CONTROL_PROPERTY)?.unwrap_or_default())
}

pub fn save_control(props: &dyn PropertyStore, control: &ControlRecord) -> Result<(), SyncError> {
    save(props, CONTROL_PROPERTY, control)
}

pub fn load_checkpoint(
    props: &dyn PropertyStore,
    scanner: &str,
) -> Result<Option<Checkpoint>, SyncError> {
    load(props, &checkpoint_property(scanner))
}

pub fn save_checkpoint(
    props: &dyn PropertyStore,
    scanner: &str,
    checkpoint: &Checkpoint,
) -> Result<(), SyncError> {
    save(props, &checkpoint_property(scanner), checkpoint)
}

/// Idempotent.
pub fn clear_checkpoint(props: &dyn PropertyStore, scanner: &str) -> Result<(), SyncError> {
    props.delete(&checkpoint_property(scanner))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dubsync_core::MemoryPropertyStore;

    #[test]
    fn cold_start_has_no_checkpoint() {
        let props = MemoryPropertyStore::new();
        assert!(load_checkpoint(&props, "health").unwrap().is_none());
        assert_eq!(load_control(&props).unwrap(), ControlRecord::default());
    }

    #[test]
    fn checkpoint_lifecycle() {
        let props = MemoryPropertyStore::new();
        let cp = Checkpoint {
            table_index: 1,
            row_index: 40,
            dataset_id: "live".into(),
            ..Checkpoint::default()
        };
        save_checkpoint(&props, "duplicates", &cp).unwrap();
        assert_eq!(load_checkpoint(&props, "duplicates").unwrap(), Some(cp));
        clear_checkpoint(&props, "duplicates").unwrap();
        clear_checkpoint(&props, "duplicates").unwrap();
        assert!(load_checkpoint(&props, "duplicates").unwrap().is_none());
    }

    #[test]
    fn corrupt_checkpoint_is_fatal() {
        let props = MemoryPropertyStore::new();
        props.set("checkpoint.health", "{\"tableIndex\": \"x\"}").unwrap();
        let err = load_checkpoint(&props, "health").unwrap_err();
        assert!(matches!(err, SyncError::CheckpointCorrupt { ref key, .. } if key == "checkpoint.health"));
    }
}
