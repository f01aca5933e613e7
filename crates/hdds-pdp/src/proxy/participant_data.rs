// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Canonical description of one discovered participant.

use crate::config::LocatorLimits;
use crate::types::{InstanceHandle, ProtocolVersion, RemoteLocatorSet, SequenceNumber, VendorId, GUID};
use std::time::Duration;

/// Lease assumed for a participant until its announcement says otherwise.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(20);

/// Everything a participant announces about itself.
///
/// One instance is shared by every local engine that has discovered the
/// participant; the pool hands it out wrapped in its own mutex. Mutating any
/// field requires that mutex.
#[derive(Debug, Clone)]
pub struct ParticipantProxyData {
    pub guid: GUID,
    pub protocol_version: ProtocolVersion,
    pub vendor_id: VendorId,
    pub expects_inline_qos: bool,
    /// Enabled builtin endpoints, `DISC_BUILTIN_ENDPOINT_*` bits.
    pub available_builtin_endpoints: u32,
    /// Locators for user traffic.
    pub default_locators: RemoteLocatorSet,
    /// Locators for discovery traffic.
    pub metatraffic_locators: RemoteLocatorSet,
    pub participant_name: String,
    /// Instance key, derived from the GUID.
    pub key: InstanceHandle,
    pub user_data: Vec<u8>,
    pub lease_duration: Duration,
    /// GUID under which the participant persists durable data, if any.
    pub persistence_guid: Option<GUID>,
    /// Opaque DDS Security identity token (verification happens elsewhere).
    pub identity_token: Option<Vec<u8>>,
    /// Opaque DDS Security permissions token.
    pub permissions_token: Option<Vec<u8>>,
    pub security_attributes: u32,
    pub plugin_security_attributes: u32,
    /// Announcement version counter; bumped per outbound ALIVE sample.
    pub version: SequenceNumber,
}

impl ParticipantProxyData {
    #[must_use]
    pub fn new(locators: &LocatorLimits) -> Self {
        Self {
            guid: GUID::unknown(),
            protocol_version: ProtocolVersion::CURRENT,
            vendor_id: VendorId::UNKNOWN,
            expects_inline_qos: false,
            available_builtin_endpoints: 0,
            default_locators: RemoteLocatorSet::new(
                locators.max_unicast_locators,
                locators.max_multicast_locators,
            ),
            metatraffic_locators: RemoteLocatorSet::new(
                locators.max_unicast_locators,
                locators.max_multicast_locators,
            ),
            participant_name: String::new(),
            key: InstanceHandle::UNKNOWN,
            user_data: Vec::new(),
            lease_duration: DEFAULT_LEASE_DURATION,
            persistence_guid: None,
            identity_token: None,
            permissions_token: None,
            security_attributes: 0,
            plugin_security_attributes: 0,
            version: SequenceNumber::new(0, 1),
        }
    }

    /// Recompute the instance key from the GUID.
    pub fn update_key(&mut self) {
        self.key = InstanceHandle::from(self.guid);
    }

    /// Copy announced fields from another instance, keeping our locator
    /// capacities.
    pub fn copy_from(&mut self, other: &ParticipantProxyData) {
        self.guid = other.guid;
        self.protocol_version = other.protocol_version;
        self.vendor_id = other.vendor_id;
        self.expects_inline_qos = other.expects_inline_qos;
        self.available_builtin_endpoints = other.available_builtin_endpoints;
        self.default_locators.copy_from(&other.default_locators);
        self.metatraffic_locators.copy_from(&other.metatraffic_locators);
        self.participant_name.clone_from(&other.participant_name);
        self.key = other.key;
        self.user_data.clone_from(&other.user_data);
        self.lease_duration = other.lease_duration;
        self.persistence_guid = other.persistence_guid;
        self.identity_token.clone_from(&other.identity_token);
        self.permissions_token.clone_from(&other.permissions_token);
        self.security_attributes = other.security_attributes;
        self.plugin_security_attributes = other.plugin_security_attributes;
        self.version = other.version;
    }

    /// Reset to the just-constructed state, keeping locator capacities.
    pub fn clear(&mut self) {
        self.guid = GUID::unknown();
        self.protocol_version = ProtocolVersion::CURRENT;
        self.vendor_id = VendorId::UNKNOWN;
        self.expects_inline_qos = false;
        self.available_builtin_endpoints = 0;
        self.default_locators.clear();
        self.metatraffic_locators.clear();
        self.participant_name.clear();
        self.key = InstanceHandle::UNKNOWN;
        self.user_data.clear();
        self.lease_duration = DEFAULT_LEASE_DURATION;
        self.persistence_guid = None;
        self.identity_token = None;
        self.permissions_token = None;
        self.security_attributes = 0;
        self.plugin_security_attributes = 0;
        self.version = SequenceNumber::new(0, 1);
    }
}
