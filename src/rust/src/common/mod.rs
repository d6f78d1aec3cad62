//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Common types used throughout the library.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod actor;
pub mod units;

/// Common Result type, using `anyhow::Error` for Error.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Stable identifier of a contact (one human participant).
pub type ContactId = String;

/// Identifier shared by the participants of a group conversation.
pub type GroupId = String;

/// Unique call identification number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId {
    id: u64,
}

impl CallId {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn random() -> Self {
        Self::new(rand::random())
    }

    pub fn as_u64(self) -> u64 {
        self.id
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.id)
    }
}

impl From<u64> for CallId {
    fn from(item: u64) -> Self {
        CallId::new(item)
    }
}

impl From<CallId> for u64 {
    fn from(item: CallId) -> Self {
        item.id
    }
}

/// Unique identification number of one call/conference context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId {
    id: u64,
}

impl FieldId {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn random() -> Self {
        Self::new(rand::random())
    }

    pub fn as_u64(self) -> u64 {
        self.id
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.id)
    }
}

impl From<u64> for FieldId {
    fn from(item: u64) -> Self {
        FieldId::new(item)
    }
}

/// Tracks the state of a call session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// No call in progress.
    Idle,

    /// Outgoing: invite sent, or incoming: answer sent; media pending.
    Dialing,

    /// The remote party's ring has been confirmed by signaling.
    Ringing,

    /// Media is flowing.
    Connected,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The call direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallDirection {
    /// Incoming call.
    InComing,

    /// Outgoing call.
    OutGoing,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Type of media for a call at time of origination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallMediaType {
    /// Call should start as audio only.
    Audio,

    /// Call should start as audio/video.
    Video,
}

impl fmt::Display for CallMediaType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Why a call session reached Idle again.
///
/// Carried by the terminal event and by the final observer callback; the
/// embedding layer maps these to user-visible messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// This side hung up.
    LocalHangup,

    /// The remote side hung up.
    RemoteHangup,

    /// The callee was already in another call.
    RemoteBusy,

    /// Ringing or answer wait exceeded its deadline.
    Timeout,

    /// Media setup failed.
    NegotiationFailure,

    /// A signaling message could not be sent.
    SignalingFailure,

    /// No usable capture device; reported before any field existed.
    DeviceFailure,

    /// An inbound invite was older than the acceptance window.
    ReceivedInviteExpired,

    /// An internal error condition.
    InternalFailure,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Latest loudness measurement for one tracked audio stream.
///
/// Transient: only the most recent sample per endpoint is retained.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeSample {
    pub contact: ContactId,
    /// Smoothed volume in `[0, 1]`.
    pub volume: f32,
    pub clipping: bool,
}

/// Session tuning knobs, all with workable defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long the remote may ring before the call times out.
    pub ring_timeout: Duration,
    /// Overall deadline for a call to reach Connected.
    pub answer_timeout: Duration,
    /// Cadence of bandwidth statistics refresh while connected.
    pub stats_interval: Duration,
    /// Inbound invites older than this are dropped instead of ringing.
    pub max_invite_age: Duration,
    /// Granularity of the deadline-checking tick.
    pub tick_interval: Duration,
    /// Minimum audio duration between two volume reports per stream.
    pub level_report_lag: Duration,
    /// Sample magnitude treated as clipping.
    pub clip_level: f32,
    /// One-sided decay factor for the volume meters.
    pub smoothing_factor: f32,
    /// How long the clipping indicator stays lit.
    pub clip_lag: Duration,
    /// Sample rate of the metered PCM, in Hz.
    pub sample_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ring_timeout: Duration::from_secs(30),
            answer_timeout: Duration::from_secs(120),
            stats_interval: Duration::from_secs(10),
            max_invite_age: Duration::from_secs(120),
            tick_interval: Duration::from_millis(200),
            level_report_lag: Duration::from_millis(25),
            clip_level: 0.98,
            smoothing_factor: 0.95,
            clip_lag: Duration::from_millis(750),
            sample_rate: 48_000,
        }
    }
}
