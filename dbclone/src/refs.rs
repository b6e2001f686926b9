//! Per-image reference counting.
//!
//! The tracker is a cached projection over the clone registry: the count for
//! an image equals the number of clones whose status still holds a reference
//! (see `CloneStatus::holds_reference`). It is not a separate source of
//! truth; `rebuild` recomputes it from the registry after a restart.
//!
//! A single mutex serializes increments, decrements and the retirement
//! zero-check, so retirement can never observe a zero count that an in-flight
//! acquire is about to invalidate.

use std::collections::HashMap;

use parking_lot::Mutex;

use dbclone_shared::errors::{CloneError, CloneResult};

use crate::registry::CloneStore;

#[derive(Default)]
pub struct ReferenceTracker {
    counts: Mutex<HashMap<String, u64>>,
}

impl ReferenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the cache from the clone registry.
    pub fn rebuild(&self, clones: &CloneStore) -> CloneResult<()> {
        let fresh = clones.reference_counts()?;
        let mut counts = self.counts.lock();
        *counts = fresh;
        Ok(())
    }

    /// Increment the counter for an image. Must happen before any storage
    /// binder call that depends on the image.
    pub fn acquire(&self, image_id: &str) -> u64 {
        let mut counts = self.counts.lock();
        let count = counts.entry(image_id.to_string()).or_insert(0);
        *count += 1;
        tracing::debug!(image_id, count = *count, "acquired image reference");
        *count
    }

    /// Decrement the counter for an image, floored at zero.
    pub fn release(&self, image_id: &str) -> CloneResult<u64> {
        let mut counts = self.counts.lock();
        match counts.get_mut(image_id) {
            Some(count) if *count > 0 => {
                *count -= 1;
                tracing::debug!(image_id, count = *count, "released image reference");
                Ok(*count)
            }
            _ => Err(CloneError::InvalidRelease(format!(
                "image {} has no live references",
                image_id
            ))),
        }
    }

    /// Current count for an image.
    pub fn count(&self, image_id: &str) -> u64 {
        self.counts.lock().get(image_id).copied().unwrap_or(0)
    }

    /// Run a retirement action while holding the counter lock.
    ///
    /// Fails with `ImageInUse` if the count is nonzero. While `op` runs no
    /// `acquire` can interleave, which makes the zero-check linearizable with
    /// respect to concurrent Create operations.
    pub fn retire_with<T, F>(&self, image_id: &str, op: F) -> CloneResult<T>
    where
        F: FnOnce() -> CloneResult<T>,
    {
        let counts = self.counts.lock();
        let live = counts.get(image_id).copied().unwrap_or(0);
        if live > 0 {
            return Err(CloneError::ImageInUse(format!(
                "image {} has {} live reference(s)",
                image_id, live
            )));
        }
        op()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CloneStatus, Database, ImageStore, NewClone, NewImage};
    use chrono::Utc;

    #[test]
    fn test_acquire_release_round_trip() {
        let tracker = ReferenceTracker::new();
        assert_eq!(tracker.acquire("img-1"), 1);
        assert_eq!(tracker.acquire("img-1"), 2);
        assert_eq!(tracker.release("img-1").unwrap(), 1);
        assert_eq!(tracker.release("img-1").unwrap(), 0);
        assert_eq!(tracker.count("img-1"), 0);
    }

    #[test]
    fn test_release_at_zero_fails() {
        let tracker = ReferenceTracker::new();
        let err = tracker.release("img-1").unwrap_err();
        assert!(matches!(err, CloneError::InvalidRelease(_)));

        tracker.acquire("img-1");
        tracker.release("img-1").unwrap();
        let err = tracker.release("img-1").unwrap_err();
        assert!(matches!(err, CloneError::InvalidRelease(_)));
    }

    #[test]
    fn test_retire_gate() {
        let tracker = ReferenceTracker::new();
        tracker.acquire("img-1");

        let err = tracker.retire_with("img-1", || Ok(())).unwrap_err();
        assert!(matches!(err, CloneError::ImageInUse(_)));

        tracker.release("img-1").unwrap();
        tracker.retire_with("img-1", || Ok(())).unwrap();
    }

    #[test]
    fn test_rebuild_from_registry() {
        let db = Database::open_in_memory().unwrap();
        let images = ImageStore::new(db.clone());
        let clones = CloneStore::new(db);

        let image = images
            .register(NewImage {
                image_name: "Sales_20260801".into(),
                image_location: "/images/sales.vhdx".into(),
                source_database_name: "Sales".into(),
                source_database_timestamp: Utc::now(),
                size_bytes: 1024,
            })
            .unwrap();

        for n in 0..3 {
            let record = clones
                .insert(NewClone {
                    clone_id: format!("clone-{}", n),
                    image_id: image.image_id.clone(),
                    clone_location: format!("/diffs/clone-{}.vhdx", n),
                    host_name: format!("host-{}", n),
                    sql_instance: "SQL01".into(),
                    database_name: "Sales".into(),
                })
                .unwrap();
            clones
                .set_status(&record.clone_id, CloneStatus::Enabled)
                .unwrap();
        }
        clones.set_status("clone-2", CloneStatus::Removed).unwrap();

        let tracker = ReferenceTracker::new();
        tracker.rebuild(&clones).unwrap();
        assert_eq!(tracker.count(&image.image_id), 2);
    }
}
