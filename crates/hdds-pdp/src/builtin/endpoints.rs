// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The builtin writer/reader pair carrying PDP samples.
//!
//! Transport is out of scope here: the writer's history is the outbound
//! surface (a transport layer drains it), the reader's history is the
//! inbound surface (a transport layer fills it, the engine consumes it).

use crate::config::{
    PDP_HEARTBEAT_PERIOD, PDP_HEARTBEAT_RESPONSE_DELAY, PDP_INITIAL_RESERVED_CACHES,
    PDP_NACK_RESPONSE_DELAY, PDP_NACK_SUPPRESSION_DURATION,
};
use crate::history::{ReaderHistory, WriterHistory};
use crate::types::{EntityId, GuidPrefix, Locator, GUID};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Reliability timing of the PDP writer, fixed by the discovery protocol.
#[derive(Debug, Clone, Copy)]
pub struct ReliabilityTiming {
    pub heartbeat_period: Duration,
    pub nack_response_delay: Duration,
    pub nack_suppression_duration: Duration,
    pub heartbeat_response_delay: Duration,
}

impl Default for ReliabilityTiming {
    fn default() -> Self {
        Self {
            heartbeat_period: PDP_HEARTBEAT_PERIOD,
            nack_response_delay: PDP_NACK_RESPONSE_DELAY,
            nack_suppression_duration: PDP_NACK_SUPPRESSION_DURATION,
            heartbeat_response_delay: PDP_HEARTBEAT_RESPONSE_DELAY,
        }
    }
}

/// Builtin writer announcing the local participant.
pub struct PdpWriter {
    pub guid: GUID,
    pub timing: ReliabilityTiming,
    pub history: WriterHistory,
}

/// Builtin reader receiving remote announcements.
pub struct PdpReader {
    pub guid: GUID,
    pub history: ReaderHistory,
    unicast_locators: Vec<Locator>,
    enabled: AtomicBool,
}

impl PdpReader {
    /// Unicast locators the reader actually listens on; the engine feeds
    /// them back into the builtin metatraffic locator list.
    #[must_use]
    pub fn unicast_locators(&self) -> &[Locator] {
        &self.unicast_locators
    }

    /// Whether inbound samples are being accepted.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Switch the reader to listening.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }
}

/// The PDP endpoint pair of one engine.
pub struct PdpEndpoints {
    pub writer: PdpWriter,
    pub reader: PdpReader,
}

impl PdpEndpoints {
    /// Build the endpoint pair with the fixed discovery QoS.
    ///
    /// `metatraffic_unicast` is the unicast list handed down by the
    /// transport layer; the reader adopts it verbatim.
    ///
    /// # Errors
    /// `Error::EndpointCreateFailed` when an endpoint GUID cannot be formed.
    pub fn create(
        guid_prefix: GuidPrefix,
        metatraffic_unicast: Vec<Locator>,
    ) -> Result<PdpEndpoints> {
        if guid_prefix.is_unknown() {
            return Err(Error::EndpointCreateFailed(
                "builtin endpoints need a valid GUID prefix".to_string(),
            ));
        }

        let writer = PdpWriter {
            guid: GUID::new(guid_prefix, EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER),
            timing: ReliabilityTiming::default(),
            history: WriterHistory::new(PDP_INITIAL_RESERVED_CACHES),
        };
        let reader = PdpReader {
            guid: GUID::new(guid_prefix, EntityId::SPDP_BUILTIN_PARTICIPANT_READER),
            history: ReaderHistory::new(PDP_INITIAL_RESERVED_CACHES),
            unicast_locators: metatraffic_unicast,
            enabled: AtomicBool::new(false),
        };

        log::debug!(
            "[pdp] Builtin endpoints created (writer={}, reader={})",
            writer.guid,
            reader.guid
        );
        Ok(PdpEndpoints { writer, reader })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_endpoints() {
        let endpoints = PdpEndpoints::create(
            GuidPrefix([1; 12]),
            vec![Locator::udpv4([127, 0, 0, 1], 7410)],
        )
        .expect("endpoint creation should succeed");

        assert_eq!(
            endpoints.writer.guid.entity_id,
            EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER
        );
        assert_eq!(
            endpoints.reader.guid.entity_id,
            EntityId::SPDP_BUILTIN_PARTICIPANT_READER
        );
        assert_eq!(endpoints.reader.unicast_locators().len(), 1);
        assert!(!endpoints.reader.is_enabled());
        assert_eq!(
            endpoints.writer.timing.heartbeat_period,
            Duration::from_millis(350)
        );
    }

    #[test]
    fn test_create_rejects_unknown_prefix() {
        let result = PdpEndpoints::create(GuidPrefix::UNKNOWN, Vec::new());
        assert!(matches!(result, Err(Error::EndpointCreateFailed(_))));
    }

    #[test]
    fn test_reader_enable() {
        let endpoints =
            PdpEndpoints::create(GuidPrefix([2; 12]), Vec::new()).expect("creation should succeed");
        endpoints.reader.enable();
        assert!(endpoints.reader.is_enabled());
    }
}
