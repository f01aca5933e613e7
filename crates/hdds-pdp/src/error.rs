// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-level error type.

use std::fmt;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by PDP operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Resource errors
    // ========================================================================
    /// Proxy pool ceiling reached and the free-list is empty.
    PoolExhausted,
    /// An endpoint was added before its participant was discovered.
    ParticipantNotFound,

    // ========================================================================
    // Lifecycle errors
    // ========================================================================
    /// `init` was called on an already-initialized engine.
    DuplicateInit,
    /// Creating the builtin PDP endpoints failed during bring-up.
    EndpointCreateFailed(String),
    /// A configuration value is out of its accepted range.
    InvalidConfiguration(String),

    // ========================================================================
    // Wire errors
    // ========================================================================
    /// PL_CDR encoding or decoding failed.
    SerializationFailed(String),
    /// Destination buffer cannot hold the encoding.
    BufferTooSmall,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::PoolExhausted => write!(f, "Proxy pool exhausted"),
            Error::ParticipantNotFound => write!(f, "Participant not found"),
            Error::DuplicateInit => write!(f, "PDP engine already initialized"),
            Error::EndpointCreateFailed(msg) => {
                write!(f, "Builtin endpoint creation failed: {}", msg)
            }
            Error::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::SerializationFailed(msg) => write!(f, "PL_CDR serialization failed: {}", msg),
            Error::BufferTooSmall => write!(f, "Buffer too small for encoding"),
        }
    }
}

impl std::error::Error for Error {}
