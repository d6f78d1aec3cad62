//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The opaque media capability boundary.
//!
//! Everything behind these traits -- capture, SDP/ICE negotiation,
//! encoding, rendering -- belongs to the embedding platform.  The core
//! only starts negotiation, toggles tracks, pulls statistics, and taps
//! audio blocks for metering.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::units::DataRate;
use crate::common::{CallMediaType, ContactId, Result};

/// Platform specific identifier of a capture device.
pub type DeviceRef = String;

/// Caller-specified desired media capabilities and devices for a call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraint {
    pub wants_audio: bool,
    pub wants_video: bool,
    pub audio_device: Option<DeviceRef>,
    pub video_device: Option<DeviceRef>,
}

impl MediaConstraint {
    pub fn audio() -> Self {
        Self {
            wants_audio: true,
            ..Default::default()
        }
    }

    pub fn audio_video() -> Self {
        Self {
            wants_audio: true,
            wants_video: true,
            ..Default::default()
        }
    }

    pub fn media_type(&self) -> CallMediaType {
        if self.wants_video {
            CallMediaType::Video
        } else {
            CallMediaType::Audio
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Opaque rendering sink handle.  Sinks are recreated by the embedder for
/// each call, never reused across calls.
pub trait MediaSink: Send + fmt::Debug {}

/// One stream's worth of a statistics snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub kind: MediaKind,
    pub bitrate: DataRate,
}

/// Raw report set produced by one stats snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub outbound: Vec<StreamStats>,
    pub inbound: Vec<StreamStats>,
}

/// Receives raw mono PCM blocks from a live audio stream.
pub type AudioBlockSink = Box<dyn FnMut(Vec<f32>) + Send>;

/// Receives the result of one asynchronous stats snapshot.
pub type StatsCallback = Box<dyn FnOnce(ConnectionStats) + Send>;

/// How the transport reports negotiation outcomes back to the core.
/// Implementations only enqueue; they never block or re-enter.
pub trait ConnectionObserver: Send {
    fn on_media_connected(&self, remote: &ContactId);
    fn on_negotiation_failed(&self, remote: &ContactId, reason: String);
}

/// Local capture opened for the duration of one call.
pub trait CaptureDevice: Send {
    /// Applies the track `enabled` flag on the capture side.
    fn set_enabled(&self, kind: MediaKind, enabled: bool);
    /// Taps the captured audio for level metering.
    fn set_audio_sink(&mut self, sink: AudioBlockSink);
    /// Binds the local preview sink.  Rebinding replaces the old sink.
    fn set_preview_sink(&mut self, sink: Box<dyn MediaSink>);
    /// Releases the devices.  Idempotent.
    fn close(&mut self);
}

/// One negotiated transport toward one remote peer.
pub trait PeerConnection: Send {
    /// Starts asynchronous negotiation; the outcome arrives through the
    /// [`ConnectionObserver`] the connection was created with.
    fn negotiate(&mut self, constraint: &MediaConstraint) -> Result<()>;

    fn set_outgoing_media_enabled(&self, kind: MediaKind, enabled: bool);
    fn set_incoming_media_enabled(&self, kind: MediaKind, enabled: bool);

    /// Binds the sink rendering this peer's media.  Rebinding replaces
    /// the old sink.
    fn set_remote_sink(&mut self, sink: Box<dyn MediaSink>);

    /// Taps this peer's received audio for level metering.
    fn set_audio_sink(&mut self, sink: AudioBlockSink);

    /// Asynchronously pulls transport statistics.  Safe to call at low
    /// frequency without accumulating observers.
    fn snapshoot_stats(&self, callback: StatsCallback);

    /// Tears the transport down.  Idempotent.
    fn close(&mut self);
}

/// Factory for captures and peer connections; the whole of what the core
/// knows about the underlying RTC implementation.
pub trait MediaBackend: Send {
    /// Opens local capture per the constraint.  Failing here means no
    /// usable device; no call state has been touched yet.
    fn open_capture(&mut self, constraint: &MediaConstraint) -> Result<Box<dyn CaptureDevice>>;

    fn create_peer_connection(
        &mut self,
        remote: &ContactId,
        observer: Box<dyn ConnectionObserver>,
    ) -> Result<Box<dyn PeerConnection>>;
}
