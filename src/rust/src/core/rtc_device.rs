//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Per-remote wrapper around the opaque peer connection.

use std::fmt;

use vumeter::{LevelSample, LevelWorker, LevelWorkerConfig};

use crate::common::{ContactId, Result};
use crate::media::{MediaConstraint, MediaKind, MediaSink, PeerConnection, StatsCallback};

/// The negotiation/transport wrapper for one remote peer's media
/// connection.  Owns the level worker metering that peer's audio.
pub struct RtcDevice {
    remote: ContactId,
    connection: Box<dyn PeerConnection>,
    level_worker: Option<LevelWorker>,
    disposed: bool,
}

impl RtcDevice {
    pub fn new(remote: ContactId, connection: Box<dyn PeerConnection>) -> Self {
        Self {
            remote,
            connection,
            level_worker: None,
            disposed: false,
        }
    }

    pub fn remote(&self) -> &ContactId {
        &self.remote
    }

    /// Kicks off asynchronous negotiation.  The outcome comes back
    /// through the connection's observer; an `Err` here means it never
    /// started.
    pub fn start_negotiation(&mut self, constraint: &MediaConstraint) -> Result<()> {
        info!("start_negotiation(): remote: {}", self.remote);
        self.connection.negotiate(constraint)
    }

    pub fn set_outgoing_enabled(&self, kind: MediaKind, enabled: bool) {
        self.connection.set_outgoing_media_enabled(kind, enabled);
    }

    pub fn set_incoming_enabled(&self, kind: MediaKind, enabled: bool) {
        self.connection.set_incoming_media_enabled(kind, enabled);
    }

    /// Binds (or rebinds) the sink rendering this peer's media.
    pub fn set_remote_sink(&mut self, sink: Box<dyn MediaSink>) {
        self.connection.set_remote_sink(sink);
    }

    /// Starts metering this peer's received audio.  Replacing an earlier
    /// worker disconnects it first.
    pub fn start_metering(
        &mut self,
        config: LevelWorkerConfig,
        on_level: Box<dyn FnMut(LevelSample) + Send>,
    ) {
        let worker = LevelWorker::start(config, on_level);
        if let Ok(feed) = worker.feed() {
            self.connection
                .set_audio_sink(Box::new(move |block| feed.process(block)));
        }
        if let Some(mut old) = self.level_worker.replace(worker) {
            old.disconnect();
        }
    }

    /// Asynchronously pulls transport statistics for this peer.
    pub fn snapshoot_stats(&self, callback: StatsCallback) {
        self.connection.snapshoot_stats(callback);
    }

    /// Releases the transport and the level worker.  Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        info!("dispose(): remote: {}", self.remote);
        if let Some(mut worker) = self.level_worker.take() {
            worker.disconnect();
        }
        self.connection.close();
    }
}

impl fmt::Display for RtcDevice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RtcDevice(remote: {})", self.remote)
    }
}

impl Drop for RtcDevice {
    fn drop(&mut self) {
        self.dispose();
    }
}
