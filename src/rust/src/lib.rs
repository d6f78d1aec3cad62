//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! # FieldRTC -- A Rust Call Signaling Core
//!
//! This crate provides the state machine, media-field bookkeeping, and
//! audio level plumbing for multi-party real-time calls.  The actual
//! media transport (SDP/ICE negotiation, encoding, rendering) is an
//! opaque capability supplied by the embedder through the [`media`]
//! traits; signaling bytes travel through an embedder-supplied
//! [`core::signaling::Signaler`].

#[macro_use]
extern crate log;

pub mod common;

pub mod error;

/// Core, transport independent functionality.
pub mod core {
    pub mod call_mutex;
    pub mod call_session;
    pub mod endpoint;
    pub mod field;
    pub mod observer;
    pub mod rtc_device;
    pub mod signaling;
}

/// Opaque media capability boundary.
pub mod media;

#[cfg(feature = "sim")]
/// Simulation backends for tests.
pub mod sim {
    pub mod error;
    pub mod sim_media;
    pub mod sim_observer;
    pub mod sim_signaling;
}
