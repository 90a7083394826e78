//! TaskRegistry - task_id → TaskRecord の共有マップ
//!
//! # 設計原則
//! - 書き手はレコードごとに 1 つ（そのタスクの pipeline）
//! - 読み手は TaskView（コピー）だけを受け取る
//! - pipeline は RecordHandle（弱参照 + id）しか持たない
//!   - 公開前に「id がまだ同じレコードを指しているか」を確認
//!   - 消えていた／差し替わっていたら黙って書き込みを捨てる
//! - ロックは同期 (std::sync)。await を跨いで保持しない
//!
//! Lock order is always map → record. Removal takes the map write lock, so a
//! publish either lands before the record is evicted or is abandoned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use chrono::{DateTime, Duration, Utc};

use crate::domain::{FileReference, FormatKey, TaskId, TaskRecord, TaskView};
use crate::observability::RegistryCounts;

struct Slot {
    created_at: DateTime<Utc>,
    record: Arc<Mutex<TaskRecord>>,
}

/// Back-reference from a pipeline to its record. Does not keep the record alive.
#[derive(Debug, Clone)]
pub struct RecordHandle {
    id: TaskId,
    record: Weak<Mutex<TaskRecord>>,
}

impl RecordHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }
}

#[derive(Default)]
pub struct TaskRegistry {
    slots: RwLock<HashMap<TaskId, Slot>>,
}

fn lock_record(record: &Mutex<TaskRecord>) -> MutexGuard<'_, TaskRecord> {
    record.lock().unwrap_or_else(|e| e.into_inner())
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TaskId, Slot>> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, Slot>> {
        self.slots.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new record. An existing record with the same id is replaced;
    /// handles to the old one stop publishing.
    pub fn insert(&self, record: TaskRecord) -> RecordHandle {
        let id = record.id;
        let created_at = record.created_at;
        let record = Arc::new(Mutex::new(record));
        let handle = RecordHandle {
            id,
            record: Arc::downgrade(&record),
        };
        self.write().insert(id, Slot { created_at, record });
        handle
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Consistent copy of the record's observable fields.
    pub fn snapshot(&self, id: TaskId) -> Option<TaskView> {
        let slots = self.read();
        let slot = slots.get(&id)?;
        let view = lock_record(&slot.record).view();
        Some(view)
    }

    pub fn file_reference(&self, id: TaskId, format: &FormatKey) -> Option<FileReference> {
        let slots = self.read();
        let slot = slots.get(&id)?;
        lock_record(&slot.record).file_reference(format)
    }

    /// Apply `update` to the record behind `handle`, atomically with respect
    /// to readers.
    ///
    /// Returns `None` without calling `update` when the record has been
    /// removed or replaced since the handle was issued.
    pub fn publish<R>(
        &self,
        handle: &RecordHandle,
        update: impl FnOnce(&mut TaskRecord) -> R,
    ) -> Option<R> {
        let slots = self.read();
        let slot = slots.get(&handle.id)?;
        if !Weak::ptr_eq(&handle.record, &Arc::downgrade(&slot.record)) {
            return None;
        }
        let mut record = lock_record(&slot.record);
        Some(update(&mut record))
    }

    /// Drop every record whose `created_at` is more than `retention` before
    /// `now`, regardless of state. Returns the removed ids.
    pub fn remove_expired(&self, now: DateTime<Utc>, retention: Duration) -> Vec<TaskId> {
        let mut slots = self.write();
        let expired: Vec<TaskId> = slots
            .iter()
            .filter(|(_, slot)| now - slot.created_at > retention)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            slots.remove(id);
        }
        expired
    }

    pub fn counts(&self) -> RegistryCounts {
        let slots = self.read();
        let mut counts = RegistryCounts::default();
        for slot in slots.values() {
            counts.add(lock_record(&slot.record).state());
        }
        counts
    }
}
