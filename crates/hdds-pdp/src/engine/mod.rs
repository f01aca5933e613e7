// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The PDP engine: participant table, announcement scheduling, lease
//! arbitration and listener notification.
//!
//! # Thread safety
//!
//! Three thread sources touch the engine: the application (init, endpoint
//! add/remove, teardown), transport receivers (inbound samples through
//! [`PdpReaderListener`]) and the timed-event thread (announcements and
//! lease checks). Lock order, outermost first:
//!
//! 1. pool mutex (leaf from the engine's perspective: never held while
//!    taking engine locks)
//! 2. engine state mutex
//! 3. participant proxy state mutex
//! 4. participant data mutex
//! 5. reader/writer data mutex
//! 6. callback mutex (listener invocations, always innermost)

mod listener;
mod proxy;

pub use listener::PdpReaderListener;
pub use proxy::ParticipantProxy;

use crate::builtin::{EndpointProtocol, LivelinessProtocol, PdpEndpoints};
use crate::config::{
    AllocationSettings, DiscoveryConfig, BUILTIN_ENDPOINT_PARTICIPANT_MESSAGE_DATA_READER,
    BUILTIN_ENDPOINT_PARTICIPANT_MESSAGE_DATA_WRITER,
    BUILTIN_ENDPOINT_PARTICIPANT_MESSAGE_SECURE_DATA_READER,
    BUILTIN_ENDPOINT_PARTICIPANT_MESSAGE_SECURE_DATA_WRITER,
    DISC_BUILTIN_ENDPOINT_PARTICIPANT_ANNOUNCER, DISC_BUILTIN_ENDPOINT_PARTICIPANT_DETECTOR,
    DISC_BUILTIN_ENDPOINT_PARTICIPANT_SECURE_ANNOUNCER,
    DISC_BUILTIN_ENDPOINT_PARTICIPANT_SECURE_DETECTOR,
};
use crate::event::{EventService, TimedEvent};
use crate::history::ChangeKind;
use crate::listener::{
    DiscoveryListener, DiscoveryStatus, ParticipantDiscoveryInfo, ReaderDiscoveryInfo,
    WriterDiscoveryInfo,
};
use crate::proxy::{
    ParticipantDataGuard, ParticipantDataRef, ParticipantProxyData, ProxyPool, ReaderDataGuard,
    ReaderDataRef, ReaderProxyData, WriterDataGuard, WriterDataRef, WriterProxyData,
};
use crate::types::{
    EntityId, GuidPrefix, InstanceHandle, Locator, ProtocolVersion, SequenceNumber, VendorId, GUID,
};
use crate::wire::{serialize_participant_data, Endianness};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

/// Locator lists the transport layer bound for one local participant.
#[derive(Debug, Clone, Default)]
pub struct ParticipantLocators {
    pub metatraffic_unicast: Vec<Locator>,
    pub metatraffic_multicast: Vec<Locator>,
    pub default_unicast: Vec<Locator>,
    pub default_multicast: Vec<Locator>,
}

/// A freshly inserted or updated participant, still holding its data lock.
///
/// The lock transfers to the caller so the proxy cannot be observed
/// half-populated; it releases when the value drops. Locks here are not
/// reentrant: drop the value before calling back into the engine.
pub struct LockedParticipant {
    // Field order matters: the guard must release before the handle drops.
    guard: ParticipantDataGuard,
    data: ParticipantDataRef,
    proxy: Arc<ParticipantProxy>,
}

impl LockedParticipant {
    #[must_use]
    pub fn proxy(&self) -> &Arc<ParticipantProxy> {
        &self.proxy
    }

    #[must_use]
    pub fn data(&self) -> &ParticipantDataRef {
        &self.data
    }
}

impl Deref for LockedParticipant {
    type Target = ParticipantProxyData;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for LockedParticipant {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// An inserted or updated reader proxy, still holding its data lock.
///
/// Drop the value before calling back into the engine; the proxy locks are
/// not reentrant.
pub struct LockedReader {
    guard: ReaderDataGuard,
    data: ReaderDataRef,
    participant_guid: GUID,
}

impl LockedReader {
    #[must_use]
    pub fn data(&self) -> &ReaderDataRef {
        &self.data
    }

    /// GUID of the participant owning this reader.
    #[must_use]
    pub fn participant_guid(&self) -> GUID {
        self.participant_guid
    }
}

impl Deref for LockedReader {
    type Target = ReaderProxyData;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for LockedReader {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// An inserted or updated writer proxy, still holding its data lock.
///
/// Drop the value before calling back into the engine; the proxy locks are
/// not reentrant.
pub struct LockedWriter {
    guard: WriterDataGuard,
    data: WriterDataRef,
    participant_guid: GUID,
}

impl LockedWriter {
    #[must_use]
    pub fn data(&self) -> &WriterDataRef {
        &self.data
    }

    /// GUID of the participant owning this writer.
    #[must_use]
    pub fn participant_guid(&self) -> GUID {
        self.participant_guid
    }
}

impl Deref for LockedWriter {
    type Target = WriterProxyData;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for LockedWriter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

struct AnnouncementState {
    event: Option<Arc<TimedEvent>>,
    initial_count: u32,
    initial_period: Duration,
    steady_period: Duration,
}

struct EngineState {
    initialized: bool,
    local_guid: GUID,
    participant_proxies: Vec<Arc<ParticipantProxy>>,
    proxies_free: Vec<Arc<ParticipantProxy>>,
    proxies_allocated: usize,
    endpoints: Option<Arc<PdpEndpoints>>,
    announcement: AnnouncementState,
}

/// Participant Discovery Protocol engine of one local participant.
///
/// Construct with [`PdpEngine::new`], bring up with [`PdpEngine::init`] and
/// [`PdpEngine::enable`]. All methods take `&self`; the engine is shared
/// across threads as an `Arc`.
pub struct PdpEngine {
    /// Self-reference handed to timer callbacks; they must never keep the
    /// engine alive on their own.
    self_weak: Weak<PdpEngine>,
    config: DiscoveryConfig,
    allocation: AllocationSettings,
    pool: Arc<ProxyPool>,
    events: OnceLock<EventService>,
    state: Mutex<EngineState>,
    /// Serializes user listener callbacks; always the innermost lock.
    callback_mutex: Mutex<()>,
    /// Local participant data changed since the last serialized
    /// announcement.
    has_changed_local_pdp: AtomicBool,
    announce_count: AtomicU64,
    listener: Mutex<Option<Arc<dyn DiscoveryListener>>>,
    edp: Mutex<Option<Arc<dyn EndpointProtocol>>>,
    wlp: Mutex<Option<Arc<dyn LivelinessProtocol>>>,
}

impl PdpEngine {
    /// Create an engine bound to `pool`.
    ///
    /// Pre-reserves the local proxy table and registers with the pool's
    /// engine refcount. The engine is inert until [`PdpEngine::init`].
    #[must_use]
    pub fn new(
        config: DiscoveryConfig,
        allocation: AllocationSettings,
        pool: Arc<ProxyPool>,
    ) -> Arc<PdpEngine> {
        pool.initialize_or_grow(&allocation);
        pool.register_engine();

        let mut proxies_free = Vec::with_capacity(allocation.participants.initial);
        for _ in 0..allocation.participants.initial {
            proxies_free.push(Arc::new(ParticipantProxy::new()));
        }

        Arc::new_cyclic(|self_weak| PdpEngine {
            self_weak: self_weak.clone(),
            config,
            allocation,
            pool,
            events: OnceLock::new(),
            state: Mutex::new(EngineState {
                initialized: false,
                local_guid: GUID::unknown(),
                participant_proxies: Vec::new(),
                proxies_allocated: allocation.participants.initial,
                proxies_free,
                endpoints: None,
                announcement: AnnouncementState {
                    event: None,
                    initial_count: 0,
                    initial_period: Duration::ZERO,
                    steady_period: Duration::ZERO,
                },
            }),
            callback_mutex: Mutex::new(()),
            has_changed_local_pdp: AtomicBool::new(true),
            announce_count: AtomicU64::new(0),
            listener: Mutex::new(None),
            edp: Mutex::new(None),
            wlp: Mutex::new(None),
        })
    }

    /// Bring the PDP machinery up: builtin endpoints, the local
    /// participant's own proxy, and the announcement timer.
    ///
    /// # Errors
    /// - `Error::DuplicateInit` when called twice.
    /// - `Error::EndpointCreateFailed` when endpoint or timer bring-up
    ///   fails; PDP stays down.
    /// - `Error::PoolExhausted` when the local proxy cannot be allocated.
    pub fn init(&self, local_guid: GUID, locators: ParticipantLocators) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.initialized {
                return Err(Error::DuplicateInit);
            }
            state.initialized = true;
            state.local_guid = local_guid;
        }

        let events = EventService::start()
            .map_err(|e| Error::EndpointCreateFailed(format!("event service: {}", e)))?;
        let _ = self.events.set(events);

        let endpoints = Arc::new(PdpEndpoints::create(
            local_guid.prefix,
            locators.metatraffic_unicast.clone(),
        )?);
        // The reader's actual unicast list is authoritative for the builtin
        // metatraffic locators.
        let metatraffic_unicast = endpoints.reader.unicast_locators().to_vec();
        self.state.lock().endpoints = Some(Arc::clone(&endpoints));

        let mut locked = match self.add_participant_proxy(local_guid, true) {
            Some(locked) => locked,
            None => return Err(Error::PoolExhausted),
        };
        self.initialize_participant_proxy_data(&mut locked, local_guid, &metatraffic_unicast, &locators);
        // Nobody knows about the local participant yet, so the lock can go.
        drop(locked);

        let weak = self.self_weak.clone();
        let event = match self.events.get() {
            Some(service) => Arc::new(TimedEvent::new(service, Duration::ZERO, move || {
                if let Some(engine) = weak.upgrade() {
                    engine.announce_participant_state(false, false);
                    engine.set_next_announcement_interval();
                    true
                } else {
                    false
                }
            })),
            None => return Err(Error::EndpointCreateFailed("event service missing".into())),
        };
        {
            let mut state = self.state.lock();
            state.announcement = AnnouncementState {
                event: Some(event),
                initial_count: self.config.initial_announcements.count,
                initial_period: self.config.initial_announcements.period,
                steady_period: self.config.announcement_period,
            };
        }
        self.set_initial_announcement_interval();

        log::info!("[pdp] PDP initialized for {}", local_guid);
        Ok(())
    }

    /// Switch the PDP reader to listening. Inbound samples before this are
    /// discarded.
    pub fn enable(&self) -> bool {
        match self.state.lock().endpoints.as_ref() {
            Some(endpoints) => {
                endpoints.reader.enable();
                true
            }
            None => false,
        }
    }

    pub fn set_listener(&self, listener: Arc<dyn DiscoveryListener>) {
        *self.listener.lock() = Some(listener);
    }

    pub fn set_endpoint_protocol(&self, edp: Arc<dyn EndpointProtocol>) {
        *self.edp.lock() = Some(edp);
    }

    pub fn set_liveliness_protocol(&self, wlp: Arc<dyn LivelinessProtocol>) {
        *self.wlp.lock() = Some(wlp);
    }

    /// Builtin PDP endpoints, once initialized.
    #[must_use]
    pub fn endpoints(&self) -> Option<Arc<PdpEndpoints>> {
        self.state.lock().endpoints.clone()
    }

    #[must_use]
    pub fn local_guid(&self) -> GUID {
        self.state.lock().local_guid
    }

    /// Participants currently in the table, the local one included.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.state.lock().participant_proxies.len()
    }

    /// Announcement cycles run so far (initial burst + steady state +
    /// dispose).
    #[must_use]
    pub fn announce_count(&self) -> u64 {
        self.announce_count.load(Ordering::Relaxed)
    }

    /// Mark the local participant data dirty; the next announcement cycle
    /// serializes a fresh sample.
    pub fn local_participant_changed(&self) {
        self.has_changed_local_pdp.store(true, Ordering::Release);
    }

    // ========================================================================
    // Participant insertion
    // ========================================================================

    /// Insert (or fetch) the proxy for `guid`, interning its data in the
    /// shared pool.
    ///
    /// Returns the proxy with its data lock held, so no other thread can
    /// observe it before the caller finished populating it. Idempotent: a
    /// second call for a known prefix returns the same proxy. Returns
    /// `None` with a warning when the local cap or the pool is exhausted.
    pub fn add_participant_proxy(&self, guid: GUID, with_lease: bool) -> Option<LockedParticipant> {
        // Fast path: already known to this engine.
        {
            let state = self.state.lock();
            if let Some(existing) = state
                .participant_proxies
                .iter()
                .find(|p| p.guid_prefix() == guid.prefix)
            {
                let proxy = Arc::clone(existing);
                drop(state);
                let data = proxy.data()?;
                let guard = data.lock_arc();
                return Some(LockedParticipant { guard, data, proxy });
            }
        }

        // Phase one: intern the shared data. The pool lock is released
        // before the engine lock is taken below.
        let (data, created) = match self.pool.acquire_participant(guid.prefix, &self.allocation) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("[pdp] Cannot allocate participant proxy data for {}: {}", guid, e);
                return None;
            }
        };

        // Phase two: the engine-local proxy. The data lock is taken under
        // the engine lock (engine before data, like every other path), so
        // the table never exposes a proxy whose data is still being
        // populated.
        let mut state = self.state.lock();
        if let Some(existing) = state
            .participant_proxies
            .iter()
            .find(|p| p.guid_prefix() == guid.prefix)
        {
            // Raced with another thread inserting the same prefix; its data
            // is the same pooled object.
            let proxy = Arc::clone(existing);
            drop(state);
            let guard = data.lock_arc();
            return Some(LockedParticipant { guard, data, proxy });
        }

        let mut guard = data.lock_arc();
        if created {
            guard.guid = guid;
            guard.update_key();
        }

        let proxy = match state.proxies_free.pop() {
            Some(proxy) => proxy,
            None => {
                if state.proxies_allocated < self.allocation.participants.maximum {
                    state.proxies_allocated += 1;
                    Arc::new(ParticipantProxy::new())
                } else {
                    log::warn!(
                        "[pdp] Maximum number of participant proxies ({}) reached for participant {}",
                        self.allocation.participants.maximum,
                        state.local_guid
                    );
                    return None;
                }
            }
        };

        let is_remote = guid != state.local_guid;
        let lease_event = if is_remote {
            match self.events.get() {
                Some(service) => {
                    let weak_engine = self.self_weak.clone();
                    let weak_proxy = Arc::downgrade(&proxy);
                    let event = TimedEvent::new(service, Duration::ZERO, move || {
                        if let (Some(engine), Some(proxy)) =
                            (weak_engine.upgrade(), weak_proxy.upgrade())
                        {
                            engine.check_remote_participant_liveliness(&proxy);
                        }
                        false
                    });
                    event.update_interval(guard.lease_duration);
                    if with_lease {
                        event.restart_timer();
                    }
                    Some(event)
                }
                None => {
                    log::debug!("[pdp] No event service yet; {} gets no lease timer", guid);
                    None
                }
            }
        } else {
            None
        };

        if let Some(event) = lease_event {
            proxy.set_lease_event(event);
        }
        {
            let mut proxy_state = proxy.lock_state();
            proxy_state.guid = guid;
            proxy_state.data = Some(data.clone());
            proxy_state.should_check_lease_duration = with_lease && is_remote;
            proxy_state.last_received_message = Instant::now();
        }
        state.participant_proxies.push(Arc::clone(&proxy));
        drop(state);

        log::debug!("[pdp] Participant proxy added for {}", guid);
        Some(LockedParticipant { guard, data, proxy })
    }

    fn initialize_participant_proxy_data(
        &self,
        data: &mut ParticipantProxyData,
        local_guid: GUID,
        metatraffic_unicast: &[Locator],
        locators: &ParticipantLocators,
    ) {
        // First announcement starts the version counter.
        data.version = SequenceNumber::new(0, 1);
        data.lease_duration = self.config.lease_duration;
        data.vendor_id = VendorId::HDDS;
        data.protocol_version = ProtocolVersion::CURRENT;
        data.expects_inline_qos = false;
        data.guid = local_guid;
        data.update_key();

        let mut mask =
            DISC_BUILTIN_ENDPOINT_PARTICIPANT_ANNOUNCER | DISC_BUILTIN_ENDPOINT_PARTICIPANT_DETECTOR;
        if self.config.security_enabled {
            mask |= DISC_BUILTIN_ENDPOINT_PARTICIPANT_SECURE_ANNOUNCER
                | DISC_BUILTIN_ENDPOINT_PARTICIPANT_SECURE_DETECTOR;
        }
        if self.config.use_writer_liveliness_protocol {
            mask |= BUILTIN_ENDPOINT_PARTICIPANT_MESSAGE_DATA_WRITER
                | BUILTIN_ENDPOINT_PARTICIPANT_MESSAGE_DATA_READER;
            if self.config.security_enabled {
                mask |= BUILTIN_ENDPOINT_PARTICIPANT_MESSAGE_SECURE_DATA_WRITER
                    | BUILTIN_ENDPOINT_PARTICIPANT_MESSAGE_SECURE_DATA_READER;
            }
        }
        data.available_builtin_endpoints = mask;

        data.default_locators.clear();
        for locator in &locators.default_unicast {
            data.default_locators.add_unicast_locator(*locator);
        }
        for locator in &locators.default_multicast {
            data.default_locators.add_multicast_locator(*locator);
        }

        data.metatraffic_locators.clear();
        for locator in metatraffic_unicast {
            data.metatraffic_locators.add_unicast_locator(*locator);
        }
        if !self.config.avoid_builtin_multicast || metatraffic_unicast.is_empty() {
            for locator in &locators.metatraffic_multicast {
                data.metatraffic_locators.add_multicast_locator(*locator);
            }
        }

        data.participant_name = self.config.participant_name.clone();
        data.user_data = self.config.user_data.clone();
        if let Some(prefix) = self.config.persistence_guid_prefix {
            data.persistence_guid = Some(GUID::new(prefix, EntityId::PARTICIPANT));
        }
    }

    // ========================================================================
    // Announcements
    // ========================================================================

    /// Run one announcement cycle.
    ///
    /// Without `dispose`, a sample is serialized only when the local data
    /// changed since the last cycle or `new_change` forces it. With
    /// `dispose`, a NOT_ALIVE_DISPOSED_UNREGISTERED sample is written
    /// unconditionally. Serialization failure is logged and the engine
    /// keeps running.
    pub fn announce_participant_state(&self, new_change: bool, dispose: bool) {
        self.announce_count.fetch_add(1, Ordering::Relaxed);

        if !dispose && !(self.has_changed_local_pdp.swap(false, Ordering::AcqRel) || new_change) {
            return;
        }

        let (endpoints, data) = {
            let state = self.state.lock();
            let Some(endpoints) = state.endpoints.clone() else {
                log::debug!("[pdp] Announcement before init; skipping");
                return;
            };
            let local = state
                .participant_proxies
                .iter()
                .find(|p| p.guid() == state.local_guid)
                .and_then(|p| p.data());
            let Some(data) = local else {
                log::debug!("[pdp] Local participant proxy missing; skipping announcement");
                return;
            };
            (endpoints, data)
        };

        let (snapshot, key) = {
            let mut guard = data.lock();
            let snapshot = guard.clone();
            if !dispose {
                // Each serialized ALIVE sample carries a strictly greater
                // version than the previous one.
                guard.version = guard.version.next();
            }
            let key = snapshot.key;
            (snapshot, key)
        };

        let kind = if dispose {
            ChangeKind::NotAliveDisposedUnregistered
        } else {
            ChangeKind::Alive
        };

        match serialize_participant_data(&snapshot, Endianness::native()) {
            Ok(payload) => {
                let history = &endpoints.writer.history;
                if !history.is_empty() {
                    history.remove_min_change();
                }
                history.add_change(kind, endpoints.writer.guid, key, payload);
                log::debug!(
                    "[announcer] Announced participant state (kind={:?}, version={:?})",
                    kind,
                    snapshot.version
                );
            }
            Err(e) => {
                log::error!("[announcer] Cannot serialize participant data: {}", e);
            }
        }
    }

    /// Pick the interval of the next announcement: burst period while the
    /// initial burst lasts, steady-state period after.
    fn set_next_announcement_interval(&self) {
        let mut state = self.state.lock();
        let announcement = &mut state.announcement;
        let interval = if announcement.initial_count > 0 {
            announcement.initial_count -= 1;
            if announcement.initial_count > 0 {
                announcement.initial_period
            } else {
                announcement.steady_period
            }
        } else {
            announcement.steady_period
        };
        if let Some(event) = &announcement.event {
            event.update_interval(interval);
        }
    }

    /// Validate the burst configuration and arm the announcement timer.
    /// With a burst configured the first cycle fires immediately.
    fn set_initial_announcement_interval(&self) {
        let event = {
            let mut state = self.state.lock();
            let announcement = &mut state.announcement;
            if announcement.initial_count > 0 && announcement.initial_period.is_zero() {
                log::warn!(
                    "[announcer] Initial announcement period is not strictly positive; forcing 1 ms"
                );
                announcement.initial_period = Duration::from_millis(1);
            }
            let first_interval = if announcement.initial_count > 0 {
                Duration::ZERO
            } else {
                announcement.steady_period
            };
            if let Some(event) = &announcement.event {
                event.update_interval(first_interval);
            }
            announcement.event.clone()
        };
        if let Some(event) = event {
            event.restart_timer();
        }
    }

    /// Cancel periodic self-announcements.
    pub fn stop_participant_announcement(&self) {
        let event = self.state.lock().announcement.event.clone();
        if let Some(event) = event {
            event.cancel_timer();
        }
    }

    /// Resume periodic self-announcements.
    pub fn reset_participant_announcement(&self) {
        let event = self.state.lock().announcement.event.clone();
        if let Some(event) = event {
            event.restart_timer();
        }
    }

    /// CDR snapshot of the local participant data.
    ///
    /// # Errors
    /// `Error::SerializationFailed` when encoding fails or the engine is
    /// not initialized.
    pub fn get_participant_proxy_data_serialized(&self, endianness: Endianness) -> Result<Vec<u8>> {
        let data = {
            let state = self.state.lock();
            state
                .participant_proxies
                .iter()
                .find(|p| p.guid() == state.local_guid)
                .and_then(|p| p.data())
        };
        let Some(data) = data else {
            return Err(Error::SerializationFailed("local participant not initialized".into()));
        };
        let snapshot = data.lock().clone();
        serialize_participant_data(&snapshot, endianness)
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    #[must_use]
    pub fn has_reader_proxy(&self, reader_guid: GUID) -> bool {
        let state = self.state.lock();
        for proxy in &state.participant_proxies {
            if proxy.guid_prefix() == reader_guid.prefix {
                let proxy_state = proxy.lock_state();
                return proxy_state
                    .readers
                    .iter()
                    .any(|r| r.lock().guid == reader_guid);
            }
        }
        false
    }

    /// Copy the reader proxy data for `reader_guid` into `out`.
    pub fn lookup_reader_proxy_data(&self, reader_guid: GUID, out: &mut ReaderProxyData) -> bool {
        match self.lookup_reader_proxy(reader_guid) {
            Some(data) => {
                out.copy_from(&data.lock());
                true
            }
            None => false,
        }
    }

    /// Shared handle to the reader proxy data for `reader_guid`.
    #[must_use]
    pub fn lookup_reader_proxy(&self, reader_guid: GUID) -> Option<ReaderDataRef> {
        let state = self.state.lock();
        for proxy in &state.participant_proxies {
            if proxy.guid_prefix() == reader_guid.prefix {
                let proxy_state = proxy.lock_state();
                return proxy_state
                    .readers
                    .iter()
                    .find(|r| r.lock().guid == reader_guid)
                    .cloned();
            }
        }
        None
    }

    #[must_use]
    pub fn has_writer_proxy_data(&self, writer_guid: GUID) -> bool {
        let state = self.state.lock();
        for proxy in &state.participant_proxies {
            if proxy.guid_prefix() == writer_guid.prefix {
                let proxy_state = proxy.lock_state();
                return proxy_state
                    .writers
                    .iter()
                    .any(|w| w.lock().guid == writer_guid);
            }
        }
        false
    }

    /// Copy the writer proxy data for `writer_guid` into `out`.
    pub fn lookup_writer_proxy_data(&self, writer_guid: GUID, out: &mut WriterProxyData) -> bool {
        match self.lookup_writer_proxy(writer_guid) {
            Some(data) => {
                out.copy_from(&data.lock());
                true
            }
            None => false,
        }
    }

    /// Shared handle to the writer proxy data for `writer_guid`.
    #[must_use]
    pub fn lookup_writer_proxy(&self, writer_guid: GUID) -> Option<WriterDataRef> {
        let state = self.state.lock();
        for proxy in &state.participant_proxies {
            if proxy.guid_prefix() == writer_guid.prefix {
                let proxy_state = proxy.lock_state();
                return proxy_state
                    .writers
                    .iter()
                    .find(|w| w.lock().guid == writer_guid)
                    .cloned();
            }
        }
        None
    }

    #[must_use]
    pub fn lookup_participant_name(&self, participant_guid: GUID) -> Option<String> {
        let state = self.state.lock();
        let proxy = state
            .participant_proxies
            .iter()
            .find(|p| p.guid() == participant_guid)?;
        let data = proxy.data()?;
        let name = data.lock().participant_name.clone();
        Some(name)
    }

    #[must_use]
    pub fn lookup_participant_key(&self, participant_guid: GUID) -> Option<InstanceHandle> {
        let state = self.state.lock();
        let proxy = state
            .participant_proxies
            .iter()
            .find(|p| p.guid() == participant_guid)?;
        let data = proxy.data()?;
        let key = data.lock().key;
        Some(key)
    }

    /// Shared handle to the participant data for `prefix`, if this engine
    /// discovered it.
    #[must_use]
    pub fn find_participant_proxy_data(&self, prefix: GuidPrefix) -> Option<ParticipantDataRef> {
        let state = self.state.lock();
        state
            .participant_proxies
            .iter()
            .find(|p| p.guid_prefix() == prefix)
            .and_then(|p| p.data())
    }

    // ========================================================================
    // Endpoint proxies
    // ========================================================================

    /// Insert or update the reader proxy for `reader_guid`.
    ///
    /// `init` receives the proxy data, whether this is an update, and the
    /// owning participant's data; returning `false` aborts the operation.
    /// On success the proxy returns still locked. `None` when the
    /// participant is unknown, the pool is exhausted, or `init` refused.
    pub fn add_reader_proxy_data<F>(&self, reader_guid: GUID, init: F) -> Option<LockedReader>
    where
        F: FnOnce(&mut ReaderProxyData, bool, &ParticipantProxyData) -> bool,
    {
        log::debug!("[pdp] Adding reader proxy data {}", reader_guid);
        let state = self.state.lock();
        let Some(proxy) = state
            .participant_proxies
            .iter()
            .find(|p| p.guid_prefix() == reader_guid.prefix)
        else {
            // An endpoint arriving before its participant is a protocol
            // violation we survive.
            log::warn!(
                "[pdp] Reader {} announced before its participant; rejected",
                reader_guid
            );
            return None;
        };

        let mut proxy_state = proxy.lock_state();
        let participant_guid = proxy_state.guid;
        let participant_data = proxy_state.data.clone()?;

        // Update path: the entity is already known.
        if let Some(existing) = proxy_state
            .readers
            .iter()
            .find(|r| r.lock().guid.entity_id == reader_guid.entity_id)
        {
            let ppd_guard = participant_data.lock();
            let mut guard = existing.lock_arc();
            if !init(&mut guard, true, &ppd_guard) {
                return None;
            }
            let snapshot = guard.clone();
            drop(ppd_guard);
            self.notify_reader(DiscoveryStatus::ChangedQos, snapshot);
            return Some(LockedReader {
                guard,
                data: existing.clone(),
                participant_guid,
            });
        }

        // Insert path: intern in the pool (possibly sharing an instance
        // another engine discovered first).
        let (data, _created) = match self.pool.acquire_reader(reader_guid, &self.allocation) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("[pdp] Cannot allocate reader proxy data for {}: {}", reader_guid, e);
                return None;
            }
        };
        proxy_state.readers.push(data.clone());

        let ppd_guard = participant_data.lock();
        let mut guard = data.lock_arc();
        if !init(&mut guard, false, &ppd_guard) {
            drop(guard);
            drop(ppd_guard);
            proxy_state.readers.pop();
            return None;
        }
        let snapshot = guard.clone();
        drop(ppd_guard);
        self.notify_reader(DiscoveryStatus::Discovered, snapshot);
        Some(LockedReader {
            guard,
            data,
            participant_guid,
        })
    }

    /// Insert or update the writer proxy for `writer_guid`. Symmetric to
    /// [`PdpEngine::add_reader_proxy_data`].
    pub fn add_writer_proxy_data<F>(&self, writer_guid: GUID, init: F) -> Option<LockedWriter>
    where
        F: FnOnce(&mut WriterProxyData, bool, &ParticipantProxyData) -> bool,
    {
        log::debug!("[pdp] Adding writer proxy data {}", writer_guid);
        let state = self.state.lock();
        let Some(proxy) = state
            .participant_proxies
            .iter()
            .find(|p| p.guid_prefix() == writer_guid.prefix)
        else {
            log::warn!(
                "[pdp] Writer {} announced before its participant; rejected",
                writer_guid
            );
            return None;
        };

        let mut proxy_state = proxy.lock_state();
        let participant_guid = proxy_state.guid;
        let participant_data = proxy_state.data.clone()?;

        if let Some(existing) = proxy_state
            .writers
            .iter()
            .find(|w| w.lock().guid.entity_id == writer_guid.entity_id)
        {
            let ppd_guard = participant_data.lock();
            let mut guard = existing.lock_arc();
            if !init(&mut guard, true, &ppd_guard) {
                return None;
            }
            let snapshot = guard.clone();
            drop(ppd_guard);
            self.notify_writer(DiscoveryStatus::ChangedQos, snapshot);
            return Some(LockedWriter {
                guard,
                data: existing.clone(),
                participant_guid,
            });
        }

        let (data, _created) = match self.pool.acquire_writer(writer_guid, &self.allocation) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("[pdp] Cannot allocate writer proxy data for {}: {}", writer_guid, e);
                return None;
            }
        };
        proxy_state.writers.push(data.clone());

        let ppd_guard = participant_data.lock();
        let mut guard = data.lock_arc();
        if !init(&mut guard, false, &ppd_guard) {
            drop(guard);
            drop(ppd_guard);
            proxy_state.writers.pop();
            return None;
        }
        let snapshot = guard.clone();
        drop(ppd_guard);
        self.notify_writer(DiscoveryStatus::Discovered, snapshot);
        Some(LockedWriter {
            guard,
            data,
            participant_guid,
        })
    }

    /// Register a builtin reader of a known participant.
    ///
    /// Idempotent; shares the pooled instance when another engine already
    /// carries it. Builtin endpoints never reach the user listener.
    pub fn add_builtin_reader_proxy_data(&self, rdata: &ReaderProxyData) -> Option<ReaderDataRef> {
        let state = self.state.lock();
        let Some(proxy) = state
            .participant_proxies
            .iter()
            .find(|p| p.guid_prefix() == rdata.guid.prefix)
        else {
            log::warn!(
                "[pdp] Builtin reader {} for unknown participant; rejected",
                rdata.guid
            );
            return None;
        };

        let mut proxy_state = proxy.lock_state();
        if let Some(existing) = proxy_state
            .builtin_readers
            .iter()
            .find(|r| r.lock().guid.entity_id == rdata.guid.entity_id)
        {
            return Some(existing.clone());
        }

        let (data, created) = match self.pool.acquire_reader(rdata.guid, &self.allocation) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("[pdp] Cannot allocate builtin reader proxy {}: {}", rdata.guid, e);
                return None;
            }
        };
        if created {
            // First holder in the process populates the shared object.
            data.lock().copy_from(rdata);
        }
        proxy_state.builtin_readers.push(data.clone());
        Some(data)
    }

    /// Register a builtin writer of a known participant. Symmetric to
    /// [`PdpEngine::add_builtin_reader_proxy_data`].
    pub fn add_builtin_writer_proxy_data(&self, wdata: &WriterProxyData) -> Option<WriterDataRef> {
        let state = self.state.lock();
        let Some(proxy) = state
            .participant_proxies
            .iter()
            .find(|p| p.guid_prefix() == wdata.guid.prefix)
        else {
            log::warn!(
                "[pdp] Builtin writer {} for unknown participant; rejected",
                wdata.guid
            );
            return None;
        };

        let mut proxy_state = proxy.lock_state();
        if let Some(existing) = proxy_state
            .builtin_writers
            .iter()
            .find(|w| w.lock().guid.entity_id == wdata.guid.entity_id)
        {
            return Some(existing.clone());
        }

        let (data, created) = match self.pool.acquire_writer(wdata.guid, &self.allocation) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("[pdp] Cannot allocate builtin writer proxy {}: {}", wdata.guid, e);
                return None;
            }
        };
        if created {
            data.lock().copy_from(wdata);
        }
        proxy_state.builtin_writers.push(data.clone());
        Some(data)
    }

    /// Remove the reader proxy for `reader_guid`: unpair in EDP, notify
    /// the listener, drop the strong reference.
    pub fn remove_reader_proxy_data(&self, reader_guid: GUID) -> bool {
        log::info!("[pdp] Removing reader proxy data {}", reader_guid);
        let edp = self.edp.lock().clone();

        let state = self.state.lock();
        for proxy in &state.participant_proxies {
            if proxy.guid_prefix() != reader_guid.prefix {
                continue;
            }
            let mut proxy_state = proxy.lock_state();
            let Some(position) = proxy_state
                .readers
                .iter()
                .position(|r| r.lock().guid == reader_guid)
            else {
                return false;
            };

            if let Some(edp) = &edp {
                edp.unpair_reader(proxy_state.guid, reader_guid);
            }
            {
                // Lock held across the notification so the snapshot cannot
                // go stale mid-callback.
                let guard = proxy_state.readers[position].lock();
                self.notify_reader(DiscoveryStatus::Removed, guard.clone());
            }
            proxy_state.readers.remove(position);
            return true;
        }
        false
    }

    /// Remove the writer proxy for `writer_guid`. Symmetric to
    /// [`PdpEngine::remove_reader_proxy_data`].
    pub fn remove_writer_proxy_data(&self, writer_guid: GUID) -> bool {
        log::info!("[pdp] Removing writer proxy data {}", writer_guid);
        let edp = self.edp.lock().clone();

        let state = self.state.lock();
        for proxy in &state.participant_proxies {
            if proxy.guid_prefix() != writer_guid.prefix {
                continue;
            }
            let mut proxy_state = proxy.lock_state();
            let Some(position) = proxy_state
                .writers
                .iter()
                .position(|w| w.lock().guid == writer_guid)
            else {
                return false;
            };

            if let Some(edp) = &edp {
                edp.unpair_writer(proxy_state.guid, writer_guid);
            }
            {
                let guard = proxy_state.writers[position].lock();
                self.notify_writer(DiscoveryStatus::Removed, guard.clone());
            }
            proxy_state.writers.remove(position);
            return true;
        }
        false
    }

    // ========================================================================
    // Participant removal and liveliness
    // ========================================================================

    /// Retire a remote participant, `reason` telling the listener whether
    /// this was graceful (`Removed`) or a lease expiry (`Dropped`).
    ///
    /// Refuses to remove the local participant. Returns `false` when the
    /// GUID is unknown.
    pub fn remove_remote_participant(&self, participant_guid: GUID, reason: DiscoveryStatus) -> bool {
        let proxy = {
            let mut state = self.state.lock();
            if participant_guid == state.local_guid {
                // Never retire ourselves.
                return false;
            }
            let Some(position) = state
                .participant_proxies
                .iter()
                .position(|p| p.guid() == participant_guid)
            else {
                return false;
            };
            state.participant_proxies.swap_remove(position)
            // Engine lock releases here: the proxy is detached, no other
            // thread can reach it through the table.
        };

        log::info!("[pdp] Removing remote participant {} ({:?})", participant_guid, reason);
        let edp = self.edp.lock().clone();
        let wlp = self.wlp.lock().clone();

        let key = {
            let proxy_state = proxy.lock_state();

            if let Some(edp) = &edp {
                for reader in &proxy_state.readers {
                    let guard = reader.lock();
                    if !guard.guid.is_unknown() {
                        edp.unpair_reader(participant_guid, guard.guid);
                        self.notify_reader(DiscoveryStatus::Removed, guard.clone());
                    }
                }
                for writer in &proxy_state.writers {
                    let guard = writer.lock();
                    if !guard.guid.is_unknown() {
                        edp.unpair_writer(participant_guid, guard.guid);
                        self.notify_writer(DiscoveryStatus::Removed, guard.clone());
                    }
                }
            }

            match &proxy_state.data {
                Some(data) => {
                    let guard = data.lock();
                    if let Some(wlp) = &wlp {
                        wlp.remove_remote_endpoints(&guard);
                    }
                    if let Some(edp) = &edp {
                        edp.remove_remote_endpoints(&guard);
                    }
                    Some(guard.key)
                }
                None => None,
            }
        };

        // Purge the remote's cached announcements.
        if let Some(key) = key {
            if let Some(endpoints) = self.state.lock().endpoints.clone() {
                endpoints.reader.history.remove_instance(key);
            }
        }

        if let Some(data) = proxy.data() {
            let listener = self.listener.lock().clone();
            if let Some(listener) = listener {
                let guard = data.lock();
                let _callbacks = self.callback_mutex.lock();
                listener.on_participant_discovery(ParticipantDiscoveryInfo {
                    status: reason,
                    data: guard.clone(),
                });
            }
        }

        // Releases the strong references (possibly returning the shared
        // objects to the pool) and stops the lease timer.
        proxy.clear();

        self.state.lock().proxies_free.push(proxy);
        true
    }

    /// Refresh the liveliness of the participant with `remote_prefix`.
    /// Called whenever any message from that participant arrives.
    pub fn assert_remote_participant_liveliness(&self, remote_prefix: GuidPrefix) {
        let state = self.state.lock();
        if remote_prefix == state.local_guid.prefix {
            return;
        }
        if let Some(proxy) = state
            .participant_proxies
            .iter()
            .find(|p| p.guid_prefix() == remote_prefix)
        {
            proxy.assert_liveliness();
        }
    }

    /// Lease timer callback body: retire the remote when its lease ran
    /// out, re-arm for the remainder otherwise.
    fn check_remote_participant_liveliness(&self, proxy: &Arc<ParticipantProxy>) {
        let expired_guid = {
            let _state = self.state.lock();
            let proxy_state = proxy.lock_state();
            if proxy_state.guid.is_unknown() {
                return;
            }
            let lease_duration = match &proxy_state.data {
                Some(data) => data.lock().lease_duration,
                None => return,
            };

            let now = Instant::now();
            let deadline = proxy_state.last_received_message + lease_duration;
            if now >= deadline {
                Some(proxy_state.guid)
            } else {
                if let Some(event) = &proxy_state.lease_event {
                    event.update_interval(deadline - now);
                    event.restart_timer();
                }
                None
            }
            // All locks release here; the removal below must run without
            // them.
        };

        if let Some(guid) = expired_guid {
            log::info!("[lease] Lease expired for {}", guid);
            self.remove_remote_participant(guid, DiscoveryStatus::Dropped);
        }
    }

    // ========================================================================
    // Inbound samples
    // ========================================================================

    /// Process one PDP sample delivered by the transport layer.
    pub fn process_pdp_sample(&self, change: crate::history::CacheChange) {
        let (endpoints, local_guid) = {
            let state = self.state.lock();
            match state.endpoints.clone() {
                Some(endpoints) => (endpoints, state.local_guid),
                None => {
                    log::debug!("[pdp] Sample before init; discarding");
                    return;
                }
            }
        };
        if !endpoints.reader.is_enabled() {
            log::debug!("[pdp] PDP reader not enabled; discarding sample");
            return;
        }

        match change.kind {
            ChangeKind::Alive => {
                let incoming = match crate::wire::parse_participant_data(
                    &change.serialized_payload,
                    &self.allocation.locators,
                ) {
                    Ok(data) => data,
                    Err(e) => {
                        log::error!("[pdp] Discarding undecodable announcement: {}", e);
                        return;
                    }
                };
                if incoming.guid == local_guid {
                    // Loopback of our own announcement.
                    return;
                }

                // Keep only the newest announcement per instance cached.
                let mut change = change;
                change.instance_handle = incoming.key;
                endpoints.reader.history.remove_instance(incoming.key);
                endpoints.reader.history.add_change(change);

                self.handle_alive_participant(incoming);
            }
            ChangeKind::NotAliveDisposedUnregistered => {
                let guid = if change.instance_handle.is_unknown() {
                    match crate::wire::parse_participant_data(
                        &change.serialized_payload,
                        &self.allocation.locators,
                    ) {
                        Ok(data) => data.guid,
                        Err(e) => {
                            log::error!("[pdp] Discarding undecodable disposal: {}", e);
                            return;
                        }
                    }
                } else {
                    GUID::from_bytes(change.instance_handle.0)
                };
                self.remove_remote_participant(guid, DiscoveryStatus::Removed);
            }
        }
    }

    /// Discover-or-update for one ALIVE announcement.
    fn handle_alive_participant(&self, incoming: ParticipantProxyData) {
        let guid = incoming.guid;
        let known = {
            let state = self.state.lock();
            state
                .participant_proxies
                .iter()
                .find(|p| p.guid_prefix() == guid.prefix)
                .cloned()
        };

        if let Some(proxy) = known {
            // Update: refresh the shared data and push the lease out.
            let snapshot = {
                let mut proxy_state = proxy.lock_state();
                let Some(data) = proxy_state.data.clone() else {
                    return;
                };
                let snapshot = {
                    let mut guard = data.lock();
                    guard.copy_from(&incoming);
                    guard.clone()
                };
                proxy_state.last_received_message = Instant::now();
                if proxy_state.should_check_lease_duration {
                    if let Some(event) = &proxy_state.lease_event {
                        event.update_interval(incoming.lease_duration);
                        event.restart_timer();
                    }
                }
                snapshot
            };
            log::debug!("[pdp] Participant {} refreshed", guid);
            self.notify_participant(DiscoveryStatus::ChangedQos, snapshot);
        } else {
            // Discovery: intern, populate under the transferred lock, then
            // arm the lease with the announced duration.
            let Some(mut locked) = self.add_participant_proxy(guid, true) else {
                log::warn!("[pdp] Cannot add discovered participant {}", guid);
                return;
            };
            locked.copy_from(&incoming);
            let snapshot = (*locked).clone();
            let proxy = Arc::clone(locked.proxy());
            drop(locked);

            {
                let proxy_state = proxy.lock_state();
                if let Some(event) = &proxy_state.lease_event {
                    event.update_interval(incoming.lease_duration);
                    event.restart_timer();
                }
            }
            proxy.assert_liveliness();

            // Seed endpoint discovery and liveliness for the new remote.
            let edp = self.edp.lock().clone();
            if let Some(edp) = edp {
                edp.assign_remote_endpoints(&snapshot);
            }
            let wlp = self.wlp.lock().clone();
            if let Some(wlp) = wlp {
                wlp.assign_remote_endpoints(&snapshot);
            }

            log::info!("[pdp] Participant {} discovered", guid);
            self.notify_participant(DiscoveryStatus::Discovered, snapshot);
        }
    }

    // ========================================================================
    // Listener notification
    // ========================================================================

    fn notify_participant(&self, status: DiscoveryStatus, data: ParticipantProxyData) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            let _callbacks = self.callback_mutex.lock();
            listener.on_participant_discovery(ParticipantDiscoveryInfo { status, data });
        }
    }

    fn notify_reader(&self, status: DiscoveryStatus, data: ReaderProxyData) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            let _callbacks = self.callback_mutex.lock();
            listener.on_reader_discovery(ReaderDiscoveryInfo { status, data });
        }
    }

    fn notify_writer(&self, status: DiscoveryStatus, data: WriterProxyData) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            let _callbacks = self.callback_mutex.lock();
            listener.on_writer_discovery(WriterDiscoveryInfo { status, data });
        }
    }
}

impl Drop for PdpEngine {
    fn drop(&mut self) {
        // Stop announcing, then cancel every lease timer (joining in-flight
        // callbacks) before releasing the proxies.
        let announcement = self.state.lock().announcement.event.take();
        if let Some(event) = announcement {
            event.cancel_timer();
        }

        let proxies = std::mem::take(&mut self.state.lock().participant_proxies);
        for proxy in &proxies {
            proxy.clear();
        }
        drop(proxies);

        self.state.lock().proxies_free.clear();
        self.pool.release_if_last();
        // The event service field drops after this body, joining its thread.
    }
}
