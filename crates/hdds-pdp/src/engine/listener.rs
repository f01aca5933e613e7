// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge between the builtin PDP reader and the engine.
//!
//! Transport receiver threads hand decoded cache changes to this listener;
//! it forwards them into the engine's mutation entry points. Holding only a
//! weak engine reference keeps a lingering transport callback from
//! extending the engine's lifetime.

use crate::engine::PdpEngine;
use crate::history::CacheChange;
use std::sync::{Arc, Weak};

/// Inbound-sample listener attached to the PDP reader.
pub struct PdpReaderListener {
    engine: Weak<PdpEngine>,
}

impl PdpReaderListener {
    #[must_use]
    pub fn new(engine: &Arc<PdpEngine>) -> Self {
        Self {
            engine: Arc::downgrade(engine),
        }
    }

    /// Called by the transport layer for every PDP sample received.
    pub fn on_new_cache_change(&self, change: CacheChange) {
        let Some(engine) = self.engine.upgrade() else {
            log::debug!("[pdp] Sample after engine teardown; discarding");
            return;
        };
        engine.process_pdp_sample(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocationSettings;
    use crate::history::ChangeKind;
    use crate::proxy::ProxyPool;
    use crate::types::{InstanceHandle, SequenceNumber, GUID};
    use crate::DiscoveryConfig;

    #[test]
    fn test_listener_survives_engine_drop() {
        let pool = ProxyPool::new();
        let engine = PdpEngine::new(
            DiscoveryConfig::default(),
            AllocationSettings::default(),
            pool,
        );
        let listener = PdpReaderListener::new(&engine);
        drop(engine);

        // Must not panic, just discard.
        listener.on_new_cache_change(CacheChange {
            kind: ChangeKind::Alive,
            writer_guid: GUID::unknown(),
            instance_handle: InstanceHandle::UNKNOWN,
            sequence_number: SequenceNumber::new(0, 1),
            serialized_payload: Vec::new(),
        });
    }
}
