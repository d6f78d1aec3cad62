//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Simulation media backend.
//!
//! In-process stand-in for the real RTC implementation: negotiation
//! completes (or fails) on command, audio blocks are injected by the
//! test, and stats snapshots return a canned report.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::units::DataRate;
use crate::common::{ContactId, Result};
use crate::media::{
    AudioBlockSink, CaptureDevice, ConnectionObserver, ConnectionStats, MediaBackend,
    MediaConstraint, MediaKind, MediaSink, PeerConnection, StatsCallback, StreamStats,
};
use crate::sim::error::SimError;

fn default_stats() -> ConnectionStats {
    ConnectionStats {
        outbound: vec![
            StreamStats {
                kind: MediaKind::Audio,
                bitrate: DataRate::from_kbps(32),
            },
            StreamStats {
                kind: MediaKind::Video,
                bitrate: DataRate::from_kbps(800),
            },
        ],
        inbound: vec![
            StreamStats {
                kind: MediaKind::Audio,
                bitrate: DataRate::from_kbps(24),
            },
            StreamStats {
                kind: MediaKind::Video,
                bitrate: DataRate::from_kbps(600),
            },
        ],
    }
}

#[derive(Default)]
struct SimMediaShared {
    should_fail_capture: AtomicBool,
    should_fail_connect: AtomicBool,
    should_fail_negotiation: AtomicBool,
    /// When set, `negotiate` reports media connected immediately.
    auto_connect: AtomicBool,

    captures_opened: AtomicUsize,
    connections_created: AtomicUsize,
    local_sinks_bound: AtomicUsize,
    remote_sinks_bound: AtomicUsize,

    canned_stats: Mutex<Option<ConnectionStats>>,
    /// Latest capture's audio tap.
    local_audio_sink: Mutex<Option<AudioBlockSink>>,
    /// Per-remote received-audio taps.
    remote_audio_sinks: Mutex<HashMap<ContactId, AudioBlockSink>>,
    /// Per-remote observers, for driving outcomes from the test.
    observers: Mutex<HashMap<ContactId, Box<dyn ConnectionObserver>>>,
    /// Latest `set_enabled`/`set_*_media_enabled` values, keyed
    /// "contact:kind:direction" ("local" for the capture side).
    toggles: Mutex<HashMap<String, bool>>,
}

impl SimMediaShared {
    fn record_toggle(&self, contact: &str, kind: MediaKind, direction: &str, enabled: bool) {
        if let Ok(mut toggles) = self.toggles.lock() {
            toggles.insert(format!("{}:{}:{}", contact, kind, direction), enabled);
        }
    }
}

/// Cloneable handle; every clone drives the same simulated transport.
#[derive(Clone, Default)]
pub struct SimMediaBackend {
    shared: Arc<SimMediaShared>,
}

impl SimMediaBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        backend.shared.auto_connect.store(true, Ordering::SeqCst);
        backend
    }

    pub fn set_should_fail_capture(&self, fail: bool) {
        self.shared
            .should_fail_capture
            .store(fail, Ordering::SeqCst);
    }

    pub fn set_should_fail_connect(&self, fail: bool) {
        self.shared
            .should_fail_connect
            .store(fail, Ordering::SeqCst);
    }

    pub fn set_should_fail_negotiation(&self, fail: bool) {
        self.shared
            .should_fail_negotiation
            .store(fail, Ordering::SeqCst);
    }

    /// Turn off to drive connection completion manually via
    /// [`SimMediaBackend::connect`].
    pub fn set_auto_connect(&self, auto: bool) {
        self.shared.auto_connect.store(auto, Ordering::SeqCst);
    }

    pub fn set_canned_stats(&self, stats: ConnectionStats) {
        if let Ok(mut canned) = self.shared.canned_stats.lock() {
            *canned = Some(stats);
        }
    }

    /// Completes negotiation for `contact` (manual mode).
    pub fn connect(&self, contact: &ContactId) {
        if let Ok(observers) = self.shared.observers.lock() {
            if let Some(observer) = observers.get(contact) {
                observer.on_media_connected(contact);
            }
        }
    }

    /// Fails the live connection for `contact` after the fact.
    pub fn fail_connection(&self, contact: &ContactId, reason: &str) {
        if let Ok(observers) = self.shared.observers.lock() {
            if let Some(observer) = observers.get(contact) {
                observer.on_negotiation_failed(contact, reason.to_string());
            }
        }
    }

    /// Feeds a block of captured (local) audio into the metering path.
    pub fn inject_local_audio(&self, block: Vec<f32>) {
        if let Ok(mut sink) = self.shared.local_audio_sink.lock() {
            if let Some(sink) = sink.as_mut() {
                sink(block);
            }
        }
    }

    /// Feeds a block of received audio for `contact` into the metering
    /// path.
    pub fn inject_remote_audio(&self, contact: &ContactId, block: Vec<f32>) {
        if let Ok(mut sinks) = self.shared.remote_audio_sinks.lock() {
            if let Some(sink) = sinks.get_mut(contact) {
                sink(block);
            }
        }
    }

    pub fn captures_opened(&self) -> usize {
        self.shared.captures_opened.load(Ordering::SeqCst)
    }

    pub fn connections_created(&self) -> usize {
        self.shared.connections_created.load(Ordering::SeqCst)
    }

    pub fn local_sinks_bound(&self) -> usize {
        self.shared.local_sinks_bound.load(Ordering::SeqCst)
    }

    pub fn remote_sinks_bound(&self) -> usize {
        self.shared.remote_sinks_bound.load(Ordering::SeqCst)
    }

    /// Number of live (not closed) peer connections.
    pub fn live_connections(&self) -> usize {
        self.shared
            .observers
            .lock()
            .map(|observers| observers.len())
            .unwrap_or(0)
    }

    /// Latest toggle value applied, or `None` if never toggled.
    /// `contact` is `"local"` for the capture side.
    pub fn toggle(&self, contact: &str, kind: MediaKind, direction: &str) -> Option<bool> {
        self.shared
            .toggles
            .lock()
            .ok()?
            .get(&format!("{}:{}:{}", contact, kind, direction))
            .copied()
    }
}

impl fmt::Display for SimMediaBackend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "SimMediaBackend(captures: {}, connections: {})",
            self.captures_opened(),
            self.connections_created()
        )
    }
}

impl MediaBackend for SimMediaBackend {
    fn open_capture(&mut self, constraint: &MediaConstraint) -> Result<Box<dyn CaptureDevice>> {
        info!("sim: open_capture(): constraint: {:?}", constraint);
        if self.shared.should_fail_capture.load(Ordering::SeqCst) {
            return Err(SimError::OpenCaptureError.into());
        }
        self.shared.captures_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimCapture {
            shared: self.shared.clone(),
            closed: false,
        }))
    }

    fn create_peer_connection(
        &mut self,
        remote: &ContactId,
        observer: Box<dyn ConnectionObserver>,
    ) -> Result<Box<dyn PeerConnection>> {
        info!("sim: create_peer_connection(): remote: {}", remote);
        if self.shared.should_fail_connect.load(Ordering::SeqCst) {
            return Err(SimError::CreateConnectionError.into());
        }
        self.shared
            .connections_created
            .fetch_add(1, Ordering::SeqCst);
        if let Ok(mut observers) = self.shared.observers.lock() {
            observers.insert(remote.clone(), observer);
        }
        Ok(Box::new(SimPeerConnection {
            remote: remote.clone(),
            shared: self.shared.clone(),
            closed: false,
        }))
    }
}

struct SimCapture {
    shared: Arc<SimMediaShared>,
    closed: bool,
}

impl CaptureDevice for SimCapture {
    fn set_enabled(&self, kind: MediaKind, enabled: bool) {
        info!("sim: capture set_enabled(): {}: {}", kind, enabled);
        self.shared.record_toggle("local", kind, "out", enabled);
    }

    fn set_audio_sink(&mut self, sink: AudioBlockSink) {
        if let Ok(mut slot) = self.shared.local_audio_sink.lock() {
            *slot = Some(sink);
        }
    }

    fn set_preview_sink(&mut self, sink: Box<dyn MediaSink>) {
        info!("sim: capture set_preview_sink(): {:?}", sink);
        self.shared.local_sinks_bound.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!("sim: capture close()");
        if let Ok(mut slot) = self.shared.local_audio_sink.lock() {
            *slot = None;
        }
    }
}

impl Drop for SimCapture {
    fn drop(&mut self) {
        self.close();
    }
}

struct SimPeerConnection {
    remote: ContactId,
    shared: Arc<SimMediaShared>,
    closed: bool,
}

impl PeerConnection for SimPeerConnection {
    fn negotiate(&mut self, constraint: &MediaConstraint) -> Result<()> {
        info!(
            "sim: negotiate(): remote: {}, constraint: {:?}",
            self.remote, constraint
        );
        if self.shared.should_fail_negotiation.load(Ordering::SeqCst) {
            return Err(SimError::NegotiateError.into());
        }
        if self.shared.auto_connect.load(Ordering::SeqCst) {
            if let Ok(observers) = self.shared.observers.lock() {
                if let Some(observer) = observers.get(&self.remote) {
                    observer.on_media_connected(&self.remote);
                }
            }
        }
        Ok(())
    }

    fn set_outgoing_media_enabled(&self, kind: MediaKind, enabled: bool) {
        self.shared.record_toggle(&self.remote, kind, "out", enabled);
    }

    fn set_incoming_media_enabled(&self, kind: MediaKind, enabled: bool) {
        self.shared.record_toggle(&self.remote, kind, "in", enabled);
    }

    fn set_remote_sink(&mut self, sink: Box<dyn MediaSink>) {
        info!("sim: set_remote_sink(): {:?}", sink);
        self.shared
            .remote_sinks_bound
            .fetch_add(1, Ordering::SeqCst);
    }

    fn set_audio_sink(&mut self, sink: AudioBlockSink) {
        if let Ok(mut sinks) = self.shared.remote_audio_sinks.lock() {
            sinks.insert(self.remote.clone(), sink);
        }
    }

    fn snapshoot_stats(&self, callback: StatsCallback) {
        let stats = self
            .shared
            .canned_stats
            .lock()
            .ok()
            .and_then(|canned| canned.clone())
            .unwrap_or_else(default_stats);
        callback(stats);
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!("sim: connection close(): remote: {}", self.remote);
        if let Ok(mut sinks) = self.shared.remote_audio_sinks.lock() {
            sinks.remove(&self.remote);
        }
        if let Ok(mut observers) = self.shared.observers.lock() {
            observers.remove(&self.remote);
        }
    }
}

impl Drop for SimPeerConnection {
    fn drop(&mut self) {
        self.close();
    }
}
