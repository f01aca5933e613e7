// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS change cache: `CacheChange` plus the writer/reader histories the
//! builtin PDP endpoints read and write.

use crate::types::{InstanceHandle, SequenceNumber, GUID};
use parking_lot::Mutex;

/// Sample kind carried by a cache change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Instance is alive; payload carries serialized data.
    Alive,
    /// Instance was disposed and unregistered by its writer.
    NotAliveDisposedUnregistered,
}

/// One RTPS sample unit traveling through a writer/reader history.
#[derive(Debug, Clone)]
pub struct CacheChange {
    pub kind: ChangeKind,
    pub writer_guid: GUID,
    pub instance_handle: InstanceHandle,
    pub sequence_number: SequenceNumber,
    pub serialized_payload: Vec<u8>,
}

/// History of the PDP writer.
///
/// Assigns monotonically increasing sequence numbers; the announce path
/// trims it to at most one change before adding a fresh one.
pub struct WriterHistory {
    state: Mutex<WriterHistoryState>,
}

struct WriterHistoryState {
    changes: Vec<CacheChange>,
    next_sequence: SequenceNumber,
}

impl WriterHistory {
    #[must_use]
    pub fn new(initial_reserved_caches: usize) -> Self {
        Self {
            state: Mutex::new(WriterHistoryState {
                changes: Vec::with_capacity(initial_reserved_caches),
                next_sequence: SequenceNumber::new(0, 1),
            }),
        }
    }

    /// Append a change, stamping its sequence number. Returns the stamped
    /// sequence number.
    pub fn add_change(
        &self,
        kind: ChangeKind,
        writer_guid: GUID,
        instance_handle: InstanceHandle,
        serialized_payload: Vec<u8>,
    ) -> SequenceNumber {
        let mut state = self.state.lock();
        let sequence_number = state.next_sequence;
        state.next_sequence = sequence_number.next();
        state.changes.push(CacheChange {
            kind,
            writer_guid,
            instance_handle,
            sequence_number,
            serialized_payload,
        });
        sequence_number
    }

    /// Remove the change with the lowest sequence number, if any.
    pub fn remove_min_change(&self) -> bool {
        let mut state = self.state.lock();
        let min = state
            .changes
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.sequence_number)
            .map(|(i, _)| i);
        match min {
            Some(index) => {
                state.changes.remove(index);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().changes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the current changes, for inspection without holding the
    /// history lock.
    #[must_use]
    pub fn changes(&self) -> Vec<CacheChange> {
        self.state.lock().changes.clone()
    }
}

/// History of the PDP reader.
pub struct ReaderHistory {
    changes: Mutex<Vec<CacheChange>>,
}

impl ReaderHistory {
    #[must_use]
    pub fn new(initial_reserved_caches: usize) -> Self {
        Self {
            changes: Mutex::new(Vec::with_capacity(initial_reserved_caches)),
        }
    }

    pub fn add_change(&self, change: CacheChange) {
        self.changes.lock().push(change);
    }

    /// Remove one cached change by writer GUID and sequence number.
    pub fn remove_change(&self, writer_guid: GUID, sequence_number: SequenceNumber) -> bool {
        let mut changes = self.changes.lock();
        let position = changes
            .iter()
            .position(|c| c.writer_guid == writer_guid && c.sequence_number == sequence_number);
        match position {
            Some(index) => {
                changes.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drop every cached change whose instance handle matches `key`.
    ///
    /// Used when a remote participant is retired to purge its stale
    /// announcements.
    pub fn remove_instance(&self, key: InstanceHandle) -> usize {
        let mut changes = self.changes.lock();
        let before = changes.len();
        changes.retain(|c| c.instance_handle != key);
        before - changes.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn changes(&self) -> Vec<CacheChange> {
        self.changes.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityId, GuidPrefix};

    fn writer_guid() -> GUID {
        GUID::new(GuidPrefix([1; 12]), EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER)
    }

    #[test]
    fn test_writer_history_sequencing() {
        let history = WriterHistory::new(4);
        let s1 = history.add_change(
            ChangeKind::Alive,
            writer_guid(),
            InstanceHandle::UNKNOWN,
            vec![1],
        );
        let s2 = history.add_change(
            ChangeKind::Alive,
            writer_guid(),
            InstanceHandle::UNKNOWN,
            vec![2],
        );
        assert_eq!(s1, SequenceNumber::new(0, 1));
        assert_eq!(s2, SequenceNumber::new(0, 2));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_writer_history_remove_min() {
        let history = WriterHistory::new(4);
        history.add_change(ChangeKind::Alive, writer_guid(), InstanceHandle::UNKNOWN, vec![1]);
        history.add_change(ChangeKind::Alive, writer_guid(), InstanceHandle::UNKNOWN, vec![2]);

        assert!(history.remove_min_change());
        let remaining = history.changes();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].sequence_number, SequenceNumber::new(0, 2));

        assert!(history.remove_min_change());
        assert!(!history.remove_min_change()); // empty
    }

    #[test]
    fn test_reader_history_remove_instance() {
        let history = ReaderHistory::new(4);
        let key_a = InstanceHandle([1; 16]);
        let key_b = InstanceHandle([2; 16]);

        for (i, key) in [key_a, key_a, key_b].iter().enumerate() {
            history.add_change(CacheChange {
                kind: ChangeKind::Alive,
                writer_guid: writer_guid(),
                instance_handle: *key,
                sequence_number: SequenceNumber::new(0, i as u32 + 1),
                serialized_payload: Vec::new(),
            });
        }

        assert_eq!(history.remove_instance(key_a), 2);
        assert_eq!(history.len(), 1);
        assert_eq!(history.remove_instance(key_a), 0);
    }

    #[test]
    fn test_reader_history_remove_change() {
        let history = ReaderHistory::new(4);
        history.add_change(CacheChange {
            kind: ChangeKind::Alive,
            writer_guid: writer_guid(),
            instance_handle: InstanceHandle::UNKNOWN,
            sequence_number: SequenceNumber::new(0, 7),
            serialized_payload: Vec::new(),
        });

        assert!(history.remove_change(writer_guid(), SequenceNumber::new(0, 7)));
        assert!(!history.remove_change(writer_guid(), SequenceNumber::new(0, 7)));
    }
}
