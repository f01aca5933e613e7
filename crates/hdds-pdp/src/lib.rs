// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # HDDS-PDP - Participant Discovery Protocol engine
//!
//! The PDP engine maintains, on every participant of a DDS domain, a live
//! directory of all remote participants and their builtin/user endpoints,
//! and keeps that directory coherent under asynchronous announcement
//! arrival, endpoint create/update/remove events, liveliness timeouts and
//! graceful shutdowns.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                          PdpEngine                                 |
//! |  participant table | announcement scheduler | lease timers         |
//! +--------------------------------------------------------------------+
//! |                          ProxyPool                                 |
//! |  process-wide intern table: one live proxy object per GUID         |
//! +--------------------------------------------------------------------+
//! |        builtin endpoints         |            wire                 |
//! |  PDP writer/reader + histories   |  PL_CDR parameter lists         |
//! +--------------------------------------------------------------------+
//! ```
//!
//! Inbound PDP samples flow through [`PdpReaderListener`] into the
//! engine, which interns proxy data in the shared [`ProxyPool`],
//! reschedules the remote's lease timer, and notifies the user
//! [`DiscoveryListener`]. Outbound, the announcement scheduler periodically
//! serializes the local participant data into the PDP writer history.
//!
//! Endpoint matching (EDP), writer liveliness (WLP), transport I/O and
//! security token verification are external collaborators reached through
//! the traits in [`builtin`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use hdds_pdp::{
//!     AllocationSettings, DiscoveryConfig, ParticipantLocators, PdpEngine, ProxyPool,
//! };
//! use hdds_pdp::types::{EntityId, GuidPrefix, GUID};
//!
//! # fn main() -> hdds_pdp::Result<()> {
//! let pool = ProxyPool::process_pool();
//! let engine = PdpEngine::new(DiscoveryConfig::default(), AllocationSettings::default(), pool);
//!
//! let guid = GUID::new(GuidPrefix([1; 12]), EntityId::PARTICIPANT);
//! engine.init(guid, ParticipantLocators::default())?;
//! engine.enable();
//! # Ok(())
//! # }
//! ```

/// Builtin PDP endpoints and the EDP/WLP collaborator traits.
pub mod builtin;
/// Global configuration: discovery constants and runtime config structs.
pub mod config;
/// Timed event service shared by lease timers and the announcement scheduler.
pub mod event;
/// RTPS change cache: `CacheChange` plus writer/reader histories.
pub mod history;
/// Upward discovery listener surface.
pub mod listener;
/// Shared proxy data objects and the process-wide proxy pool.
pub mod proxy;
/// RTPS identity and addressing primitives (GUID, locators, sequence numbers).
pub mod types;
/// PL_CDR encoding/decoding of participant announcements.
pub mod wire;

mod engine;
mod error;

pub use config::{AllocationSettings, DiscoveryConfig, InitialAnnouncements};
pub use engine::{
    LockedParticipant, LockedReader, LockedWriter, ParticipantLocators, ParticipantProxy,
    PdpEngine, PdpReaderListener,
};
pub use error::{Error, Result};
pub use listener::{
    DiscoveryListener, DiscoveryStatus, ParticipantDiscoveryInfo, ReaderDiscoveryInfo,
    WriterDiscoveryInfo,
};
pub use proxy::{ParticipantProxyData, ProxyPool, ReaderProxyData, WriterProxyData};
