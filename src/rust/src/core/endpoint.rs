//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Participant identity and per-participant media state.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::common::units::DataRate;
use crate::common::ContactId;
use crate::core::rtc_device::RtcDevice;
use crate::media::{ConnectionStats, MediaKind};

/// Identity/address value for a communication peer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: Option<String>,
    pub address: Option<String>,
    pub port: u16,
}

impl Endpoint {
    pub fn new(name: Option<String>, address: Option<String>, port: u16) -> Self {
        Self {
            name,
            address,
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}",
            self.name.as_deref().unwrap_or("-"),
            self.address.as_deref().unwrap_or("-"),
            self.port
        )
    }
}

/// A participant's media state record within a Field.
///
/// Device-enable flags record local capture intent; stream-enable flags
/// record whether the negotiated stream is actually flowing, and can only
/// become true for media the device flag allowed at negotiation time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldEndpoint {
    pub contact: ContactId,
    pub endpoint: Endpoint,

    video_enabled: bool,
    audio_enabled: bool,
    video_stream_enabled: bool,
    audio_stream_enabled: bool,

    // Device intent captured when negotiation completed; bounds the
    // stream flags from then on.
    negotiated_video: bool,
    negotiated_audio: bool,

    pub video_upstream_bandwidth: DataRate,
    pub video_downstream_bandwidth: DataRate,
    pub audio_upstream_bandwidth: DataRate,
    pub audio_downstream_bandwidth: DataRate,

    /// When this participant was added; (added_time, contact) gives a
    /// stable sort for list rendering.
    pub added_time: SystemTime,
}

impl FieldEndpoint {
    pub fn new(contact: ContactId, endpoint: Endpoint) -> Self {
        Self {
            contact,
            endpoint,
            video_enabled: false,
            audio_enabled: false,
            video_stream_enabled: false,
            audio_stream_enabled: false,
            negotiated_video: false,
            negotiated_audio: false,
            video_upstream_bandwidth: DataRate::default(),
            video_downstream_bandwidth: DataRate::default(),
            audio_upstream_bandwidth: DataRate::default(),
            audio_downstream_bandwidth: DataRate::default(),
            added_time: SystemTime::now(),
        }
    }

    /// Records that negotiation completed with the current device intent
    /// and marks the allowed streams as flowing.
    pub fn mark_negotiated(&mut self) {
        self.negotiated_video = self.video_enabled;
        self.negotiated_audio = self.audio_enabled;
        self.video_stream_enabled = self.negotiated_video;
        self.audio_stream_enabled = self.negotiated_audio;
    }

    /// Toggles outbound video intent, forwarding to the device when one
    /// is attached.  Safe to call with no device.
    pub fn enable_outbound_video(&mut self, device: Option<&RtcDevice>, enabled: bool) {
        self.video_enabled = enabled;
        if let Some(device) = device {
            device.set_outgoing_enabled(MediaKind::Video, enabled);
        }
    }

    pub fn enable_outbound_audio(&mut self, device: Option<&RtcDevice>, enabled: bool) {
        self.audio_enabled = enabled;
        if let Some(device) = device {
            device.set_outgoing_enabled(MediaKind::Audio, enabled);
        }
    }

    /// Toggles playout of this participant's negotiated video stream.
    /// The stream flag cannot exceed what negotiation allowed.
    pub fn enable_inbound_video(&mut self, device: Option<&RtcDevice>, enabled: bool) {
        self.video_stream_enabled = enabled && self.negotiated_video;
        if let Some(device) = device {
            device.set_incoming_enabled(MediaKind::Video, enabled);
        }
    }

    pub fn enable_inbound_audio(&mut self, device: Option<&RtcDevice>, enabled: bool) {
        self.audio_stream_enabled = enabled && self.negotiated_audio;
        if let Some(device) = device {
            device.set_incoming_enabled(MediaKind::Audio, enabled);
        }
    }

    pub fn outbound_video_enabled(&self) -> bool {
        self.video_enabled
    }

    pub fn outbound_audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn inbound_video_enabled(&self) -> bool {
        self.video_stream_enabled
    }

    pub fn inbound_audio_enabled(&self) -> bool {
        self.audio_stream_enabled
    }

    /// Folds a stats snapshot into the bandwidth counters.
    pub fn apply_stats(&mut self, stats: &ConnectionStats) {
        for stream in &stats.outbound {
            match stream.kind {
                MediaKind::Audio => self.audio_upstream_bandwidth = stream.bitrate,
                MediaKind::Video => self.video_upstream_bandwidth = stream.bitrate,
            }
        }
        for stream in &stats.inbound {
            match stream.kind {
                MediaKind::Audio => self.audio_downstream_bandwidth = stream.bitrate,
                MediaKind::Video => self.video_downstream_bandwidth = stream.bitrate,
            }
        }
    }
}

impl fmt::Display for FieldEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.contact, self.endpoint)
    }
}
