//! In-memory datalayer for tests and development.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use hyperspace_data::PackedTuple;
use hyperspace_types::{RegionId, SequenceId, Version};

use crate::{DataLayer, StorageError};

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<(RegionId, Bytes), (PackedTuple, Version)>,
    /// Highest sequence id seen per region, "durable" for resume tests.
    sequences: HashMap<RegionId, SequenceId>,
    /// Sequence ids hinted as data-free, in arrival order.
    acked: Vec<(RegionId, SequenceId)>,
}

/// A [`DataLayer`] over a mutex-protected map.
///
/// Besides the contract, it exposes inspection helpers and a write-fault
/// toggle so tests can drive the engine's wedge path.
#[derive(Debug, Default)]
pub struct MemoryDataLayer {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
}

impl MemoryDataLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every subsequent write returns [`StorageError::Io`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of live objects in `region`.
    pub fn region_len(&self, region: RegionId) -> usize {
        let inner = self.inner.lock().expect("datalayer mutex poisoned");
        inner.objects.keys().filter(|(ri, _)| *ri == region).count()
    }

    /// The mark-acked hints recorded so far.
    pub fn acked_hints(&self) -> Vec<(RegionId, SequenceId)> {
        let inner = self.inner.lock().expect("datalayer mutex poisoned");
        inner.acked.clone()
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io("injected write failure".to_string()));
        }

        Ok(())
    }

    fn record_seq(inner: &mut Inner, region: RegionId, seq: SequenceId) {
        let entry = inner.sequences.entry(region).or_insert(seq);

        if *entry < seq {
            *entry = seq;
        }
    }
}

impl DataLayer for MemoryDataLayer {
    fn get(
        &self,
        region: RegionId,
        key: &Bytes,
    ) -> Result<Option<(PackedTuple, Version)>, StorageError> {
        let inner = self.inner.lock().expect("datalayer mutex poisoned");
        Ok(inner.objects.get(&(region, key.clone())).cloned())
    }

    fn put(
        &self,
        region: RegionId,
        seq: SequenceId,
        key: &Bytes,
        value: &PackedTuple,
        version: Version,
    ) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut inner = self.inner.lock().expect("datalayer mutex poisoned");
        Self::record_seq(&mut inner, region, seq);
        inner
            .objects
            .insert((region, key.clone()), (value.clone(), version));
        Ok(())
    }

    fn overwrite(
        &self,
        region: RegionId,
        seq: SequenceId,
        key: &Bytes,
        old_value: &PackedTuple,
        new_value: &PackedTuple,
        version: Version,
    ) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut inner = self.inner.lock().expect("datalayer mutex poisoned");

        match inner.objects.get(&(region, key.clone())) {
            Some((stored, _)) if stored == old_value => {}
            Some(_) | None => {
                tracing::error!(
                    region = %region,
                    key = ?key,
                    "overwrite consistency check failed"
                );
                return Err(StorageError::Corruption);
            }
        }

        Self::record_seq(&mut inner, region, seq);
        inner
            .objects
            .insert((region, key.clone()), (new_value.clone(), version));
        Ok(())
    }

    fn delete(
        &self,
        region: RegionId,
        seq: SequenceId,
        key: &Bytes,
        old_value: &PackedTuple,
    ) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut inner = self.inner.lock().expect("datalayer mutex poisoned");

        match inner.objects.get(&(region, key.clone())) {
            Some((stored, _)) if stored == old_value => {}
            Some(_) => {
                tracing::error!(
                    region = %region,
                    key = ?key,
                    "delete consistency check failed"
                );
                return Err(StorageError::Corruption);
            }
            // Deleting a key that is already gone is a no-op; the chain
            // may replay a delete after a crash.
            None => {}
        }

        Self::record_seq(&mut inner, region, seq);
        inner.objects.remove(&(region, key.clone()));
        Ok(())
    }

    fn mark_acked(&self, region: RegionId, seq: SequenceId) {
        let mut inner = self.inner.lock().expect("datalayer mutex poisoned");
        Self::record_seq(&mut inner, region, seq);
        inner.acked.push((region, seq));
    }

    fn resume_sequence(&self, region: RegionId) -> Option<SequenceId> {
        let inner = self.inner.lock().expect("datalayer mutex poisoned");
        inner.sequences.get(&region).copied()
    }
}

#[cfg(test)]
mod tests {
    use hyperspace_data::{AttrType, Attribute, Schema, Value};

    use super::*;

    fn schema() -> Schema {
        Schema::new(
            "kv",
            vec![
                Attribute::new("u", AttrType::STRING),
                Attribute::new("v", AttrType::INT64),
            ],
        )
    }

    fn tuple(v: i64) -> PackedTuple {
        PackedTuple::encode(&schema(), &[Value::Int(v)]).unwrap()
    }

    fn key() -> Bytes {
        Bytes::from_static(b"k1")
    }

    #[test]
    fn put_get_delete_round_trip() {
        let data = MemoryDataLayer::new();
        let r = RegionId::new(1);
        assert_eq!(data.get(r, &key()).unwrap(), None);

        data.put(r, SequenceId::new(1), &key(), &tuple(7), Version::new(1))
            .unwrap();
        assert_eq!(
            data.get(r, &key()).unwrap(),
            Some((tuple(7), Version::new(1)))
        );

        data.delete(r, SequenceId::new(2), &key(), &tuple(7)).unwrap();
        assert_eq!(data.get(r, &key()).unwrap(), None);
    }

    #[test]
    fn overwrite_checks_old_value() {
        let data = MemoryDataLayer::new();
        let r = RegionId::new(1);
        data.put(r, SequenceId::new(1), &key(), &tuple(7), Version::new(1))
            .unwrap();

        let err = data
            .overwrite(
                r,
                SequenceId::new(2),
                &key(),
                &tuple(8),
                &tuple(9),
                Version::new(2),
            )
            .unwrap_err();
        assert_eq!(err, StorageError::Corruption);

        data.overwrite(
            r,
            SequenceId::new(2),
            &key(),
            &tuple(7),
            &tuple(9),
            Version::new(2),
        )
        .unwrap();
        assert_eq!(
            data.get(r, &key()).unwrap(),
            Some((tuple(9), Version::new(2)))
        );
    }

    #[test]
    fn delete_of_missing_key_is_replay_safe() {
        let data = MemoryDataLayer::new();
        let r = RegionId::new(1);
        data.delete(r, SequenceId::new(5), &key(), &tuple(1)).unwrap();
        assert_eq!(data.resume_sequence(r), Some(SequenceId::new(5)));
    }

    #[test]
    fn sequences_resume_at_high_water_mark() {
        let data = MemoryDataLayer::new();
        let r = RegionId::new(1);
        assert_eq!(data.resume_sequence(r), None);

        data.put(r, SequenceId::new(3), &key(), &tuple(1), Version::new(1))
            .unwrap();
        data.mark_acked(r, SequenceId::new(9));
        data.put(r, SequenceId::new(4), &key(), &tuple(2), Version::new(2))
            .unwrap();
        assert_eq!(data.resume_sequence(r), Some(SequenceId::new(9)));
        assert_eq!(data.acked_hints(), vec![(r, SequenceId::new(9))]);
    }

    #[test]
    fn injected_failures_surface_as_io() {
        let data = MemoryDataLayer::new();
        let r = RegionId::new(1);
        data.set_fail_writes(true);
        let err = data
            .put(r, SequenceId::new(1), &key(), &tuple(7), Version::new(1))
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));

        data.set_fail_writes(false);
        data.put(r, SequenceId::new(1), &key(), &tuple(7), Version::new(1))
            .unwrap();
    }
}
