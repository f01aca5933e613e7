// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PL_CDR encoding of participant announcements.
//!
//! A serialized announcement is the 4-byte encapsulation header followed by
//! a parameter list: `(pid: u16, length: u16, payload)` entries terminated
//! by `PID_SENTINEL`. Parameter payloads are padded to 4-byte alignment.
//! The parser skips unknown PIDs by their declared length, so announcements
//! from richer vendors still yield a usable proxy.

mod constants;

use crate::config::LocatorLimits;
use crate::proxy::ParticipantProxyData;
use crate::types::{Locator, ProtocolVersion, SequenceNumber, VendorId, GUID};
use crate::{Error, Result};
use constants::*;
use std::time::Duration;

/// Byte order of one encapsulated payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

impl Endianness {
    /// Byte order of the running platform; announcements are encapsulated
    /// in native order and re-ordered by the receiver.
    #[must_use]
    pub fn native() -> Self {
        #[cfg(target_endian = "big")]
        {
            Endianness::Big
        }
        #[cfg(target_endian = "little")]
        {
            Endianness::Little
        }
    }
}

fn u16_bytes(value: u16, endianness: Endianness) -> [u8; 2] {
    match endianness {
        Endianness::Big => value.to_be_bytes(),
        Endianness::Little => value.to_le_bytes(),
    }
}

fn u32_bytes(value: u32, endianness: Endianness) -> [u8; 4] {
    match endianness {
        Endianness::Big => value.to_be_bytes(),
        Endianness::Little => value.to_le_bytes(),
    }
}

fn read_u16(bytes: &[u8], endianness: Endianness) -> u16 {
    let pair = [bytes[0], bytes[1]];
    match endianness {
        Endianness::Big => u16::from_be_bytes(pair),
        Endianness::Little => u16::from_le_bytes(pair),
    }
}

fn read_u32(bytes: &[u8], endianness: Endianness) -> u32 {
    let quad = [bytes[0], bytes[1], bytes[2], bytes[3]];
    match endianness {
        Endianness::Big => u32::from_be_bytes(quad),
        Endianness::Little => u32::from_le_bytes(quad),
    }
}

fn align_4(len: usize) -> usize {
    (len + 3) & !3
}

/// Build a participant announcement into `buf`.
///
/// # Returns
/// Number of bytes written.
///
/// # Errors
/// `Error::BufferTooSmall` when the output buffer cannot hold the encoding.
pub fn build_participant_data(
    data: &ParticipantProxyData,
    buf: &mut [u8],
    endianness: Endianness,
) -> Result<usize> {
    let mut offset = 0;

    // Encapsulation identifier is always big-endian per the CDR spec.
    if buf.len() < 4 {
        return Err(Error::BufferTooSmall);
    }
    let encapsulation = match endianness {
        Endianness::Big => PL_CDR_BE,
        Endianness::Little => PL_CDR_LE,
    };
    buf[0..2].copy_from_slice(&encapsulation.to_be_bytes());
    buf[2] = 0; // options
    buf[3] = 0;
    offset += 4;

    let write_header =
        |buf: &mut [u8], offset: &mut usize, pid: u16, length: u16| -> Result<()> {
            if *offset + 4 + usize::from(length) > buf.len() {
                return Err(Error::BufferTooSmall);
            }
            buf[*offset..*offset + 2].copy_from_slice(&u16_bytes(pid, endianness));
            buf[*offset + 2..*offset + 4].copy_from_slice(&u16_bytes(length, endianness));
            *offset += 4;
            Ok(())
        };

    // PID_PROTOCOL_VERSION (mandatory, RTPS v2.3 Table 8.73)
    write_header(buf, &mut offset, PID_PROTOCOL_VERSION, 4)?;
    buf[offset] = data.protocol_version.major;
    buf[offset + 1] = data.protocol_version.minor;
    buf[offset + 2] = 0;
    buf[offset + 3] = 0;
    offset += 4;

    // PID_VENDOR_ID (mandatory)
    write_header(buf, &mut offset, PID_VENDOR_ID, 4)?;
    buf[offset] = data.vendor_id.0[0];
    buf[offset + 1] = data.vendor_id.0[1];
    buf[offset + 2] = 0;
    buf[offset + 3] = 0;
    offset += 4;

    // PID_PARTICIPANT_GUID
    write_header(buf, &mut offset, PID_PARTICIPANT_GUID, 16)?;
    buf[offset..offset + 16].copy_from_slice(&data.guid.as_bytes());
    offset += 16;

    // PID_BUILTIN_ENDPOINT_SET
    write_header(buf, &mut offset, PID_BUILTIN_ENDPOINT_SET, 4)?;
    buf[offset..offset + 4]
        .copy_from_slice(&u32_bytes(data.available_builtin_endpoints, endianness));
    offset += 4;

    // PID_EXPECTS_INLINE_QOS
    write_header(buf, &mut offset, PID_EXPECTS_INLINE_QOS, 4)?;
    buf[offset] = u8::from(data.expects_inline_qos);
    buf[offset + 1] = 0;
    buf[offset + 2] = 0;
    buf[offset + 3] = 0;
    offset += 4;

    let write_locator =
        |buf: &mut [u8], offset: &mut usize, pid: u16, locator: &Locator| -> Result<()> {
            write_header(buf, offset, pid, LOCATOR_SIZE as u16)?;
            buf[*offset..*offset + 4].copy_from_slice(&u32_bytes(locator.kind as u32, endianness));
            *offset += 4;
            buf[*offset..*offset + 4].copy_from_slice(&u32_bytes(locator.port, endianness));
            *offset += 4;
            buf[*offset..*offset + 16].copy_from_slice(&locator.address);
            *offset += 16;
            Ok(())
        };

    for locator in data.metatraffic_locators.unicast() {
        write_locator(buf, &mut offset, PID_METATRAFFIC_UNICAST_LOCATOR, locator)?;
    }
    for locator in data.metatraffic_locators.multicast() {
        write_locator(buf, &mut offset, PID_METATRAFFIC_MULTICAST_LOCATOR, locator)?;
    }
    for locator in data.default_locators.unicast() {
        write_locator(buf, &mut offset, PID_DEFAULT_UNICAST_LOCATOR, locator)?;
    }
    for locator in data.default_locators.multicast() {
        write_locator(buf, &mut offset, PID_DEFAULT_MULTICAST_LOCATOR, locator)?;
    }

    // PID_PARTICIPANT_LEASE_DURATION: seconds + nanoseconds
    write_header(buf, &mut offset, PID_PARTICIPANT_LEASE_DURATION, 8)?;
    let seconds = match u32::try_from(data.lease_duration.as_secs()) {
        Ok(value) => value,
        Err(_) => {
            log::debug!(
                "[wire] Lease duration {:?} exceeds the RTPS seconds field; clamping",
                data.lease_duration
            );
            u32::MAX
        }
    };
    buf[offset..offset + 4].copy_from_slice(&u32_bytes(seconds, endianness));
    buf[offset + 4..offset + 8]
        .copy_from_slice(&u32_bytes(data.lease_duration.subsec_nanos(), endianness));
    offset += 8;

    // PID_ENTITY_NAME: CDR string (length incl. NUL, padded to 4)
    if !data.participant_name.is_empty() {
        let name = data.participant_name.as_bytes();
        let string_len = name.len() + 1;
        let padded = align_4(string_len);
        let param_len = u16::try_from(4 + padded).map_err(|_| Error::BufferTooSmall)?;
        write_header(buf, &mut offset, PID_ENTITY_NAME, param_len)?;
        buf[offset..offset + 4].copy_from_slice(&u32_bytes(string_len as u32, endianness));
        offset += 4;
        buf[offset..offset + name.len()].copy_from_slice(name);
        for i in name.len()..padded {
            buf[offset + i] = 0; // NUL terminator + padding
        }
        offset += padded;
    }

    // PID_USER_DATA: CDR sequence<octet>
    if !data.user_data.is_empty() {
        let padded = align_4(data.user_data.len());
        let param_len = u16::try_from(4 + padded).map_err(|_| Error::BufferTooSmall)?;
        write_header(buf, &mut offset, PID_USER_DATA, param_len)?;
        buf[offset..offset + 4]
            .copy_from_slice(&u32_bytes(data.user_data.len() as u32, endianness));
        offset += 4;
        buf[offset..offset + data.user_data.len()].copy_from_slice(&data.user_data);
        for i in data.user_data.len()..padded {
            buf[offset + i] = 0;
        }
        offset += padded;
    }

    // PID_PERSISTENCE_GUID (vendor range)
    if let Some(persistence_guid) = data.persistence_guid {
        write_header(buf, &mut offset, PID_PERSISTENCE_GUID, 16)?;
        buf[offset..offset + 16].copy_from_slice(&persistence_guid.as_bytes());
        offset += 16;
    }

    // PID_SENTINEL closes the list.
    write_header(buf, &mut offset, PID_SENTINEL, 0)?;

    Ok(offset)
}

/// Build a participant announcement into a fresh buffer.
pub fn serialize_participant_data(
    data: &ParticipantProxyData,
    endianness: Endianness,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; crate::config::PARTICIPANT_DATA_MAX_SIZE];
    let written = build_participant_data(data, &mut buf, endianness)?;
    buf.truncate(written);
    Ok(buf)
}

/// Parse a participant announcement.
///
/// `limits` bounds the locator sets of the produced proxy data.
///
/// # Errors
/// `Error::SerializationFailed` on truncation, a bad encapsulation header,
/// or a missing participant GUID.
pub fn parse_participant_data(
    buf: &[u8],
    limits: &LocatorLimits,
) -> Result<ParticipantProxyData> {
    if buf.len() < 4 {
        return Err(Error::SerializationFailed("payload shorter than encapsulation".into()));
    }
    let endianness = match u16::from_be_bytes([buf[0], buf[1]]) {
        PL_CDR_BE => Endianness::Big,
        PL_CDR_LE => Endianness::Little,
        other => {
            return Err(Error::SerializationFailed(format!(
                "unsupported encapsulation 0x{:04x}",
                other
            )))
        }
    };

    let mut data = ParticipantProxyData::new(limits);
    let mut guid_seen = false;
    let mut offset = 4;

    loop {
        if offset + 4 > buf.len() {
            return Err(Error::SerializationFailed("parameter list not terminated".into()));
        }
        let pid = read_u16(&buf[offset..], endianness);
        let length = usize::from(read_u16(&buf[offset + 2..], endianness));
        offset += 4;

        if pid == PID_SENTINEL {
            break;
        }
        if length % 4 != 0 {
            return Err(Error::SerializationFailed(format!(
                "parameter 0x{:04x} length {} not 4-byte aligned",
                pid, length
            )));
        }
        if offset + length > buf.len() {
            return Err(Error::SerializationFailed(format!(
                "parameter 0x{:04x} truncated",
                pid
            )));
        }
        let payload = &buf[offset..offset + length];
        offset += length;

        match pid {
            PID_PROTOCOL_VERSION if length >= 2 => {
                data.protocol_version = ProtocolVersion {
                    major: payload[0],
                    minor: payload[1],
                };
            }
            PID_VENDOR_ID if length >= 2 => {
                data.vendor_id = VendorId([payload[0], payload[1]]);
            }
            PID_PARTICIPANT_GUID if length >= 16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&payload[..16]);
                data.guid = GUID::from_bytes(bytes);
                data.update_key();
                guid_seen = true;
            }
            PID_BUILTIN_ENDPOINT_SET if length >= 4 => {
                data.available_builtin_endpoints = read_u32(payload, endianness);
            }
            PID_EXPECTS_INLINE_QOS if length >= 1 => {
                data.expects_inline_qos = payload[0] != 0;
            }
            PID_METATRAFFIC_UNICAST_LOCATOR if length >= LOCATOR_SIZE => {
                data.metatraffic_locators
                    .add_unicast_locator(parse_locator(payload, endianness));
            }
            PID_METATRAFFIC_MULTICAST_LOCATOR if length >= LOCATOR_SIZE => {
                data.metatraffic_locators
                    .add_multicast_locator(parse_locator(payload, endianness));
            }
            PID_DEFAULT_UNICAST_LOCATOR if length >= LOCATOR_SIZE => {
                data.default_locators
                    .add_unicast_locator(parse_locator(payload, endianness));
            }
            PID_DEFAULT_MULTICAST_LOCATOR if length >= LOCATOR_SIZE => {
                data.default_locators
                    .add_multicast_locator(parse_locator(payload, endianness));
            }
            PID_PARTICIPANT_LEASE_DURATION if length >= 8 => {
                let seconds = read_u32(payload, endianness);
                let nanos = read_u32(&payload[4..], endianness).min(999_999_999);
                data.lease_duration =
                    Duration::from_secs(u64::from(seconds)) + Duration::from_nanos(u64::from(nanos));
            }
            PID_ENTITY_NAME if length >= 4 => {
                data.participant_name = parse_cdr_string(payload, endianness)?;
            }
            PID_USER_DATA if length >= 4 => {
                let declared = usize::try_from(read_u32(payload, endianness))
                    .map_err(|_| Error::SerializationFailed("user data length".into()))?;
                if 4 + declared > length {
                    return Err(Error::SerializationFailed("user data truncated".into()));
                }
                data.user_data = payload[4..4 + declared].to_vec();
            }
            PID_PERSISTENCE_GUID if length >= 16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&payload[..16]);
                data.persistence_guid = Some(GUID::from_bytes(bytes));
            }
            _ => {
                // Unknown or vendor-specific parameter: skip by length.
            }
        }
    }

    if !guid_seen {
        return Err(Error::SerializationFailed("missing participant GUID".into()));
    }
    // The version counter is engine-local and never travels the wire.
    data.version = SequenceNumber::new(0, 1);
    Ok(data)
}

fn parse_locator(payload: &[u8], endianness: Endianness) -> Locator {
    let kind = read_u32(payload, endianness) as i32;
    let port = read_u32(&payload[4..], endianness);
    let mut address = [0u8; 16];
    address.copy_from_slice(&payload[8..24]);
    Locator { kind, port, address }
}

fn parse_cdr_string(payload: &[u8], endianness: Endianness) -> Result<String> {
    // The declared length counts the NUL terminator.
    let declared = usize::try_from(read_u32(payload, endianness))
        .map_err(|_| Error::SerializationFailed("string length".into()))?;
    if declared == 0 {
        return Ok(String::new());
    }
    if 4 + declared > payload.len() {
        return Err(Error::SerializationFailed("string truncated".into()));
    }
    let bytes = &payload[4..4 + declared];
    let without_nul = match bytes.iter().position(|&b| b == 0) {
        Some(position) => &bytes[..position],
        None => bytes,
    };
    String::from_utf8(without_nul.to_vec())
        .map_err(|_| Error::SerializationFailed("string not valid UTF-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        LocatorLimits, DISC_BUILTIN_ENDPOINT_PARTICIPANT_ANNOUNCER,
        DISC_BUILTIN_ENDPOINT_PARTICIPANT_DETECTOR,
    };
    use crate::types::{EntityId, GuidPrefix};

    fn limits() -> LocatorLimits {
        LocatorLimits {
            max_unicast_locators: 4,
            max_multicast_locators: 2,
        }
    }

    fn sample_data() -> ParticipantProxyData {
        let mut data = ParticipantProxyData::new(&limits());
        data.guid = GUID::new(
            GuidPrefix([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]),
            EntityId::PARTICIPANT,
        );
        data.update_key();
        data.vendor_id = VendorId::HDDS;
        data.available_builtin_endpoints = DISC_BUILTIN_ENDPOINT_PARTICIPANT_ANNOUNCER
            | DISC_BUILTIN_ENDPOINT_PARTICIPANT_DETECTOR;
        data.metatraffic_locators
            .add_unicast_locator(Locator::udpv4([192, 168, 1, 20], 7410));
        data.metatraffic_locators
            .add_multicast_locator(Locator::udpv4([239, 255, 0, 1], 7400));
        data.default_locators
            .add_unicast_locator(Locator::udpv4([192, 168, 1, 20], 7411));
        data.lease_duration = Duration::from_millis(20_500);
        data.participant_name = "sensor_node".to_string();
        data.user_data = vec![0xDE, 0xAD, 0xBE];
        data.persistence_guid = Some(GUID::new(GuidPrefix([9; 12]), EntityId::PARTICIPANT));
        data
    }

    #[test]
    fn test_roundtrip_little_endian() {
        let data = sample_data();
        let bytes =
            serialize_participant_data(&data, Endianness::Little).expect("serialize should succeed");
        let parsed = parse_participant_data(&bytes, &limits()).expect("parse should succeed");

        assert_eq!(parsed.guid, data.guid);
        assert_eq!(parsed.key, data.key);
        assert_eq!(parsed.vendor_id, data.vendor_id);
        assert_eq!(parsed.protocol_version, data.protocol_version);
        assert_eq!(
            parsed.available_builtin_endpoints,
            data.available_builtin_endpoints
        );
        assert_eq!(parsed.metatraffic_locators, data.metatraffic_locators);
        assert_eq!(parsed.default_locators, data.default_locators);
        assert_eq!(parsed.lease_duration, data.lease_duration);
        assert_eq!(parsed.participant_name, data.participant_name);
        assert_eq!(parsed.user_data, data.user_data);
        assert_eq!(parsed.persistence_guid, data.persistence_guid);
        assert_eq!(parsed.expects_inline_qos, data.expects_inline_qos);
    }

    #[test]
    fn test_roundtrip_big_endian() {
        let data = sample_data();
        let bytes =
            serialize_participant_data(&data, Endianness::Big).expect("serialize should succeed");
        assert_eq!(u16::from_be_bytes([bytes[0], bytes[1]]), PL_CDR_BE);

        let parsed = parse_participant_data(&bytes, &limits()).expect("parse should succeed");
        assert_eq!(parsed.guid, data.guid);
        assert_eq!(parsed.lease_duration, data.lease_duration);
        assert_eq!(parsed.participant_name, data.participant_name);
    }

    #[test]
    fn test_parse_skips_unknown_pid() {
        let data = sample_data();
        let mut bytes =
            serialize_participant_data(&data, Endianness::Little).expect("serialize should succeed");

        // Splice an unknown parameter right after the encapsulation header.
        let mut spliced = bytes[..4].to_vec();
        spliced.extend_from_slice(&0x7F00u16.to_le_bytes());
        spliced.extend_from_slice(&4u16.to_le_bytes());
        spliced.extend_from_slice(&[0xAA; 4]);
        spliced.extend_from_slice(&bytes.split_off(4));

        let parsed = parse_participant_data(&spliced, &limits()).expect("parse should skip");
        assert_eq!(parsed.guid, data.guid);
    }

    #[test]
    fn test_parse_rejects_truncation() {
        let data = sample_data();
        let bytes =
            serialize_participant_data(&data, Endianness::Little).expect("serialize should succeed");

        let truncated = &bytes[..bytes.len() - 6];
        assert!(parse_participant_data(truncated, &limits()).is_err());
    }

    #[test]
    fn test_parse_requires_guid() {
        // Encapsulation + sentinel only.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&PL_CDR_LE.to_be_bytes());
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&PID_SENTINEL.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());

        let result = parse_participant_data(&bytes, &limits());
        assert!(matches!(result, Err(Error::SerializationFailed(_))));
    }

    #[test]
    fn test_build_rejects_small_buffer() {
        let data = sample_data();
        let mut tiny = [0u8; 16];
        assert_eq!(
            build_participant_data(&data, &mut tiny, Endianness::Little).err(),
            Some(Error::BufferTooSmall)
        );
    }
}
