// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local per-engine wrapper around one discovered participant.

use crate::event::TimedEvent;
use crate::proxy::{ParticipantDataRef, ReaderDataRef, WriterDataRef};
use crate::types::{GuidPrefix, GUID};
use parking_lot::{Mutex, MutexGuard};
use std::time::Instant;

pub(crate) struct ProxyState {
    pub(crate) guid: GUID,
    /// Strong reference into the shared pool; other engines may hold the
    /// same object.
    pub(crate) data: Option<ParticipantDataRef>,
    /// User endpoints discovered inside this participant.
    pub(crate) readers: Vec<ReaderDataRef>,
    pub(crate) writers: Vec<WriterDataRef>,
    /// Builtin endpoints; matched separately and never reported to the
    /// user listener.
    pub(crate) builtin_readers: Vec<ReaderDataRef>,
    pub(crate) builtin_writers: Vec<WriterDataRef>,
    pub(crate) should_check_lease_duration: bool,
    pub(crate) last_received_message: Instant,
    pub(crate) lease_event: Option<TimedEvent>,
}

/// One remote (or the local) participant as seen by one engine.
///
/// Holds the strong reference keeping the shared proxy data alive plus the
/// engine-local endpoint lists and lease bookkeeping. Instances cycle
/// between the engine's participant table and its free-list.
pub struct ParticipantProxy {
    state: Mutex<ProxyState>,
}

impl ParticipantProxy {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ProxyState {
                guid: GUID::unknown(),
                data: None,
                readers: Vec::new(),
                writers: Vec::new(),
                builtin_readers: Vec::new(),
                builtin_writers: Vec::new(),
                should_check_lease_duration: false,
                last_received_message: Instant::now(),
                lease_event: None,
            }),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ProxyState> {
        self.state.lock()
    }

    #[must_use]
    pub fn guid(&self) -> GUID {
        self.state.lock().guid
    }

    #[must_use]
    pub fn guid_prefix(&self) -> GuidPrefix {
        self.state.lock().guid.prefix
    }

    /// Shared participant data, if this proxy is populated.
    #[must_use]
    pub fn data(&self) -> Option<ParticipantDataRef> {
        self.state.lock().data.clone()
    }

    /// Refresh the liveliness timestamp; the lease check measures from
    /// here.
    pub fn assert_liveliness(&self) {
        self.state.lock().last_received_message = Instant::now();
    }

    /// Instant of the last message received from this participant.
    #[must_use]
    pub fn last_received_message(&self) -> Instant {
        self.state.lock().last_received_message
    }

    /// Install the lease timer driving this proxy's liveliness checks.
    pub(crate) fn set_lease_event(&self, event: TimedEvent) {
        self.state.lock().lease_event = Some(event);
    }

    /// Drop all strong references and stop the lease timer, returning the
    /// proxy to its pristine state.
    ///
    /// The shared objects may return to the pool here, when this was their
    /// last holder.
    pub fn clear(&self) {
        // Move everything out under the lock and release it before dropping:
        // the lease cancel can block on an in-flight callback that itself
        // locks this state, and handle drops take the pool mutex.
        let (data, readers, writers, builtin_readers, builtin_writers, lease_event) = {
            let mut state = self.state.lock();
            state.guid = GUID::unknown();
            state.should_check_lease_duration = false;
            state.last_received_message = Instant::now();
            (
                state.data.take(),
                std::mem::take(&mut state.readers),
                std::mem::take(&mut state.writers),
                std::mem::take(&mut state.builtin_readers),
                std::mem::take(&mut state.builtin_writers),
                state.lease_event.take(),
            )
        };

        if let Some(event) = &lease_event {
            event.cancel_timer();
        }
        drop(lease_event);
        drop(builtin_writers);
        drop(builtin_readers);
        drop(writers);
        drop(readers);
        drop(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocationSettings;
    use crate::proxy::ProxyPool;
    use crate::types::{EntityId, GuidPrefix};

    #[test]
    fn test_new_proxy_is_pristine() {
        let proxy = ParticipantProxy::new();
        assert!(proxy.guid().is_unknown());
        assert!(proxy.data().is_none());
    }

    #[test]
    fn test_assert_liveliness_moves_timestamp() {
        let proxy = ParticipantProxy::new();
        let before = proxy.last_received_message();
        std::thread::sleep(std::time::Duration::from_millis(5));
        proxy.assert_liveliness();
        assert!(proxy.last_received_message() > before);
    }

    #[test]
    fn test_clear_releases_pool_reference() {
        let pool = ProxyPool::new();
        let allocation = AllocationSettings::default();
        pool.initialize_or_grow(&allocation);

        let guid = GUID::new(GuidPrefix([4; 12]), EntityId::PARTICIPANT);
        let (data, _created) = pool
            .acquire_participant(guid.prefix, &allocation)
            .expect("acquire should succeed");

        let proxy = ParticipantProxy::new();
        {
            let mut state = proxy.lock_state();
            state.guid = guid;
            state.data = Some(data);
        }
        assert_eq!(pool.live_participants(), 1);

        proxy.clear();
        assert!(proxy.data().is_none());
        assert_eq!(pool.live_participants(), 0);
    }
}
