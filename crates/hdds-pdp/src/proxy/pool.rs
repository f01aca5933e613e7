// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide proxy pool.
//!
//! Interns one live proxy object per GUID across all PDP engines of the
//! process. Slots are arena entries holding a reusable `Arc<Mutex<..Data>>`;
//! the weak index maps a GUID to `(slot, generation)`, so an index entry is
//! live exactly while its generation matches and some engine still holds a
//! strong handle. Retired slots keep their allocation and return to the
//! free-list.

use crate::config::AllocationSettings;
use crate::proxy::{ParticipantProxyData, ReaderProxyData, WriterProxyData};
use crate::types::{EntityId, GuidPrefix, InstanceHandle, GUID};
use crate::{Error, Result};
use parking_lot::{Mutex, MutexGuard, RawMutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Owned guard over pooled participant data; keeps the data locked while the
/// guard lives, independent of lifetimes.
pub type ParticipantDataGuard = parking_lot::lock_api::ArcMutexGuard<RawMutex, ParticipantProxyData>;
/// Owned guard over pooled reader data.
pub type ReaderDataGuard = parking_lot::lock_api::ArcMutexGuard<RawMutex, ReaderProxyData>;
/// Owned guard over pooled writer data.
pub type WriterDataGuard = parking_lot::lock_api::ArcMutexGuard<RawMutex, WriterProxyData>;

/// Weak reference into an arena: live iff the slot's generation still
/// matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotKey {
    index: usize,
    generation: u64,
}

struct Slot<T> {
    generation: u64,
    /// Strong handles currently outstanding. Zero-transition is linearized
    /// under the pool mutex.
    strong: Arc<AtomicUsize>,
    /// GUID key of the current occupant; `None` while on the free-list.
    key: Option<KeyBytes>,
    data: Arc<Mutex<T>>,
}

/// Index key as raw GUID bytes so one slot type serves both prefix-keyed
/// (participants) and full-GUID-keyed (endpoints) arenas.
type KeyBytes = [u8; 16];

fn prefix_key(prefix: GuidPrefix) -> KeyBytes {
    GUID::new(prefix, EntityId::UNKNOWN).as_bytes()
}

fn guid_key(guid: GUID) -> KeyBytes {
    guid.as_bytes()
}

struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    index: HashMap<KeyBytes, SlotKey>,
}

impl<T> Arena<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn grow_to(&mut self, initial: usize, make: impl Fn() -> T) {
        while self.slots.len() < initial {
            let index = self.slots.len();
            self.slots.push(Slot {
                generation: 0,
                strong: Arc::new(AtomicUsize::new(0)),
                key: None,
                data: Arc::new(Mutex::new(make())),
            });
            self.free.push(index);
        }
    }

    /// Upgrade the weak index entry for `key`, taking a strong reference.
    fn lookup(&mut self, key: KeyBytes) -> Option<(Arc<Mutex<T>>, Arc<AtomicUsize>, SlotKey)> {
        let slot_key = *self.index.get(&key)?;
        let slot = &self.slots[slot_key.index];
        debug_assert_eq!(slot.generation, slot_key.generation);
        debug_assert!(slot.strong.load(Ordering::Acquire) > 0);
        slot.strong.fetch_add(1, Ordering::AcqRel);
        Some((Arc::clone(&slot.data), Arc::clone(&slot.strong), slot_key))
    }

    /// Take a free slot (or allocate one below `maximum`) and register the
    /// weak index entry for `key`.
    fn take(
        &mut self,
        key: KeyBytes,
        maximum: usize,
        make: impl Fn() -> T,
    ) -> Result<(Arc<Mutex<T>>, Arc<AtomicUsize>, SlotKey)> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                if self.slots.len() >= maximum {
                    return Err(Error::PoolExhausted);
                }
                let index = self.slots.len();
                self.slots.push(Slot {
                    generation: 0,
                    strong: Arc::new(AtomicUsize::new(0)),
                    key: None,
                    data: Arc::new(Mutex::new(make())),
                });
                index
            }
        };

        let slot = &mut self.slots[index];
        slot.key = Some(key);
        slot.strong.store(1, Ordering::Release);
        let slot_key = SlotKey {
            index,
            generation: slot.generation,
        };
        self.index.insert(key, slot_key);
        Ok((Arc::clone(&slot.data), Arc::clone(&slot.strong), slot_key))
    }

    /// Return a slot whose last strong handle dropped. Stale keys (already
    /// retired, or pool reset) are ignored.
    fn retire(&mut self, slot_key: SlotKey, clear: impl Fn(&mut T)) {
        let Some(slot) = self.slots.get_mut(slot_key.index) else {
            return;
        };
        if slot.generation != slot_key.generation {
            return;
        }

        // Uncontended: no strong handle exists, and bundled guards never
        // outlive their handle.
        clear(&mut *slot.data.lock());

        if let Some(key) = slot.key.take() {
            self.index.remove(&key);
        }
        slot.generation += 1;
        self.free.push(slot_key.index);
    }

    fn live_count(&self) -> usize {
        self.index.len()
    }

    fn reset(&mut self) {
        debug_assert!(self.index.is_empty(), "pool destroyed with live proxies");
        self.slots.clear();
        self.free.clear();
        self.index.clear();
    }
}

struct PoolState {
    engines: usize,
    participants: Arena<ParticipantProxyData>,
    readers: Arena<ReaderProxyData>,
    writers: Arena<WriterProxyData>,
}

/// Process-wide intern table for proxy data objects.
///
/// Engines share one pool (usually [`ProxyPool::process_pool`]); every
/// `acquire_*` either upgrades a live instance discovered by another engine
/// or takes a cleared slot from the free-list. The last strong handle drop
/// returns the slot.
pub struct ProxyPool {
    state: Mutex<PoolState>,
}

impl ProxyPool {
    #[must_use]
    pub fn new() -> Arc<ProxyPool> {
        Arc::new(ProxyPool {
            state: Mutex::new(PoolState {
                engines: 0,
                participants: Arena::new(),
                readers: Arena::new(),
                writers: Arena::new(),
            }),
        })
    }

    /// The pool shared by all engines of the process that did not get an
    /// explicit one.
    #[must_use]
    pub fn process_pool() -> Arc<ProxyPool> {
        static POOL: OnceLock<Arc<ProxyPool>> = OnceLock::new();
        Arc::clone(POOL.get_or_init(ProxyPool::new))
    }

    /// Pre-reserve at least `initial` slots per kind. Idempotent; called by
    /// every engine at construction.
    pub fn initialize_or_grow(&self, allocation: &AllocationSettings) {
        let locators = allocation.locators;
        let mut state = self.state.lock();
        state
            .participants
            .grow_to(allocation.participants.initial, || {
                ParticipantProxyData::new(&locators)
            });
        state.readers.grow_to(allocation.readers.initial, || {
            ReaderProxyData::new(locators.max_unicast_locators, locators.max_multicast_locators)
        });
        state.writers.grow_to(allocation.writers.initial, || {
            WriterProxyData::new(locators.max_unicast_locators, locators.max_multicast_locators)
        });
    }

    /// Count this engine against the pool lifetime.
    pub(crate) fn register_engine(&self) {
        self.state.lock().engines += 1;
    }

    /// Drop this engine's claim; the last engine tears the pooled storage
    /// down. All proxies must have been released by then.
    pub(crate) fn release_if_last(&self) {
        let mut state = self.state.lock();
        state.engines = state.engines.saturating_sub(1);
        if state.engines == 0 {
            state.participants.reset();
            state.readers.reset();
            state.writers.reset();
        }
    }

    /// Intern participant data for `prefix`.
    ///
    /// Returns the (possibly shared) handle and whether the object was
    /// freshly taken from the free-list.
    pub fn acquire_participant(
        self: &Arc<Self>,
        prefix: GuidPrefix,
        allocation: &AllocationSettings,
    ) -> Result<(ParticipantDataRef, bool)> {
        let key = prefix_key(prefix);
        let locators = allocation.locators;
        let mut state = self.state.lock();

        if let Some((data, strong, slot)) = state.participants.lookup(key) {
            drop(state);
            return Ok((ParticipantDataRef::new(data, strong, slot, self), false));
        }

        let (data, strong, slot) = state.participants.take(
            key,
            allocation.participants.maximum,
            || ParticipantProxyData::new(&locators),
        )?;
        {
            // Fresh occupant: stamp identity before anyone can share it.
            let mut guard = data.lock();
            guard.guid = GUID::new(prefix, EntityId::PARTICIPANT);
            guard.key = InstanceHandle::from(guard.guid);
        }
        drop(state);
        Ok((ParticipantDataRef::new(data, strong, slot, self), true))
    }

    /// Intern reader data for `guid`; shares a live instance discovered by
    /// another engine when one exists.
    pub fn acquire_reader(
        self: &Arc<Self>,
        guid: GUID,
        allocation: &AllocationSettings,
    ) -> Result<(ReaderDataRef, bool)> {
        let key = guid_key(guid);
        let locators = allocation.locators;
        let mut state = self.state.lock();

        if let Some((data, strong, slot)) = state.readers.lookup(key) {
            drop(state);
            return Ok((ReaderDataRef::new(data, strong, slot, self), false));
        }

        let (data, strong, slot) = state.readers.take(key, allocation.readers.maximum, || {
            ReaderProxyData::new(locators.max_unicast_locators, locators.max_multicast_locators)
        })?;
        data.lock().guid = guid;
        drop(state);
        Ok((ReaderDataRef::new(data, strong, slot, self), true))
    }

    /// Intern writer data for `guid`.
    pub fn acquire_writer(
        self: &Arc<Self>,
        guid: GUID,
        allocation: &AllocationSettings,
    ) -> Result<(WriterDataRef, bool)> {
        let key = guid_key(guid);
        let locators = allocation.locators;
        let mut state = self.state.lock();

        if let Some((data, strong, slot)) = state.writers.lookup(key) {
            drop(state);
            return Ok((WriterDataRef::new(data, strong, slot, self), false));
        }

        let (data, strong, slot) = state.writers.take(key, allocation.writers.maximum, || {
            WriterProxyData::new(locators.max_unicast_locators, locators.max_multicast_locators)
        })?;
        data.lock().guid = guid;
        drop(state);
        Ok((WriterDataRef::new(data, strong, slot, self), true))
    }

    /// Upgrade the live participant entry for `prefix`, if any.
    #[must_use]
    pub fn find_participant(self: &Arc<Self>, prefix: GuidPrefix) -> Option<ParticipantDataRef> {
        let mut state = self.state.lock();
        let (data, strong, slot) = state.participants.lookup(prefix_key(prefix))?;
        drop(state);
        Some(ParticipantDataRef::new(data, strong, slot, self))
    }

    /// Upgrade the live reader entry for `guid`, if any.
    #[must_use]
    pub fn find_reader(self: &Arc<Self>, guid: GUID) -> Option<ReaderDataRef> {
        let mut state = self.state.lock();
        let (data, strong, slot) = state.readers.lookup(guid_key(guid))?;
        drop(state);
        Some(ReaderDataRef::new(data, strong, slot, self))
    }

    /// Upgrade the live writer entry for `guid`, if any.
    #[must_use]
    pub fn find_writer(self: &Arc<Self>, guid: GUID) -> Option<WriterDataRef> {
        let mut state = self.state.lock();
        let (data, strong, slot) = state.writers.lookup(guid_key(guid))?;
        drop(state);
        Some(WriterDataRef::new(data, strong, slot, self))
    }

    /// Live (indexed) participant entries, for introspection and tests.
    #[must_use]
    pub fn live_participants(&self) -> usize {
        self.state.lock().participants.live_count()
    }

    /// Live (indexed) reader entries.
    #[must_use]
    pub fn live_readers(&self) -> usize {
        self.state.lock().readers.live_count()
    }

    /// Live (indexed) writer entries.
    #[must_use]
    pub fn live_writers(&self) -> usize {
        self.state.lock().writers.live_count()
    }

    fn retire_participant(&self, slot: SlotKey, strong: &AtomicUsize) {
        let mut state = self.state.lock();
        if strong.fetch_sub(1, Ordering::AcqRel) == 1 {
            state.participants.retire(slot, ParticipantProxyData::clear);
        }
    }

    fn retire_reader(&self, slot: SlotKey, strong: &AtomicUsize) {
        let mut state = self.state.lock();
        if strong.fetch_sub(1, Ordering::AcqRel) == 1 {
            state.readers.retire(slot, ReaderProxyData::clear);
        }
    }

    fn retire_writer(&self, slot: SlotKey, strong: &AtomicUsize) {
        let mut state = self.state.lock();
        if strong.fetch_sub(1, Ordering::AcqRel) == 1 {
            state.writers.retire(slot, WriterProxyData::clear);
        }
    }
}

/// Generates the three strong-handle types. The drop hook runs the
/// return-to-pool protocol exactly once, on the last handle.
macro_rules! impl_data_ref {
    ($handle:ident, $data:ty, $guard:ty, $retire:ident, $doc:literal) => {
        #[doc = $doc]
        ///
        /// Cloning shares the pooled instance; dropping the last clone clears
        /// the object, erases its weak-index entry and returns the slot to
        /// the free-list.
        pub struct $handle {
            data: Arc<Mutex<$data>>,
            strong: Arc<AtomicUsize>,
            slot: SlotKey,
            pool: Arc<ProxyPool>,
        }

        impl $handle {
            fn new(
                data: Arc<Mutex<$data>>,
                strong: Arc<AtomicUsize>,
                slot: SlotKey,
                pool: &Arc<ProxyPool>,
            ) -> Self {
                Self {
                    data,
                    strong,
                    slot,
                    pool: Arc::clone(pool),
                }
            }

            /// Lock the shared data.
            pub fn lock(&self) -> MutexGuard<'_, $data> {
                self.data.lock()
            }

            /// Lock the shared data with an owned guard, usable for
            /// lock-transferring returns.
            pub fn lock_arc(&self) -> $guard {
                self.data.lock_arc()
            }

            /// Outstanding strong handles across all engines.
            #[must_use]
            pub fn strong_count(&self) -> usize {
                self.strong.load(Ordering::Acquire)
            }

            /// Whether two handles share the same pooled instance.
            #[must_use]
            pub fn shares_with(&self, other: &Self) -> bool {
                Arc::ptr_eq(&self.data, &other.data)
            }
        }

        impl Clone for $handle {
            fn clone(&self) -> Self {
                // A live handle guarantees strong > 0, so the slot cannot be
                // retired concurrently with this increment.
                self.strong.fetch_add(1, Ordering::AcqRel);
                Self {
                    data: Arc::clone(&self.data),
                    strong: Arc::clone(&self.strong),
                    slot: self.slot,
                    pool: Arc::clone(&self.pool),
                }
            }
        }

        impl Drop for $handle {
            fn drop(&mut self) {
                self.pool.$retire(self.slot, &self.strong);
            }
        }
    };
}

impl_data_ref!(
    ParticipantDataRef,
    ParticipantProxyData,
    ParticipantDataGuard,
    retire_participant,
    "Strong, pool-managed reference to shared participant data."
);
impl_data_ref!(
    ReaderDataRef,
    ReaderProxyData,
    ReaderDataGuard,
    retire_reader,
    "Strong, pool-managed reference to shared reader data."
);
impl_data_ref!(
    WriterDataRef,
    WriterProxyData,
    WriterDataGuard,
    retire_writer,
    "Strong, pool-managed reference to shared writer data."
);
