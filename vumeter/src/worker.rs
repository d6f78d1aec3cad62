//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The threaded meter variant.
//!
//! A [`LevelWorker`] owns a dedicated thread running a [`VolumeMeter`]
//! over sample blocks delivered through a channel, so metering never runs
//! on the thread producing the audio.  Every block is metered; reporting
//! back to the registered callback is throttled to once per
//! `report_lag / 1000 * sample_rate` frames to bound message traffic.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::meter::{LevelSample, MeterConfig, VolumeMeter};

#[derive(Error, Debug, Eq, PartialEq)]
pub enum WorkerError {
    /// The worker thread is gone (panicked or torn down elsewhere).
    #[error("audio level worker is disconnected")]
    Disconnected,
}

/// Configuration for a [`LevelWorker`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelWorkerConfig {
    pub meter: MeterConfig,
    /// Minimum audio duration between two reports.  Independent of the
    /// meter's `clip_lag`, which governs the clipping indicator.
    pub report_lag: Duration,
}

impl Default for LevelWorkerConfig {
    fn default() -> Self {
        Self {
            meter: MeterConfig::default(),
            report_lag: Duration::from_millis(25),
        }
    }
}

enum WorkerMessage {
    Block(Vec<f32>),
    Disconnect,
}

/// Cloneable handle for feeding sample blocks to a [`LevelWorker`].
///
/// Feeds held after the worker disconnected turn into silent no-ops, so
/// audio producers never observe the teardown.
#[derive(Clone, Debug)]
pub struct LevelFeed {
    sender: Sender<WorkerMessage>,
}

impl LevelFeed {
    /// Queues one block of mono PCM for metering.
    pub fn process(&self, block: Vec<f32>) {
        let _ = self.sender.send(WorkerMessage::Block(block));
    }
}

/// Runs a [`VolumeMeter`] on its own thread and reports throttled levels.
pub struct LevelWorker {
    sender: Option<Sender<WorkerMessage>>,
    handle: Option<JoinHandle<()>>,
}

impl LevelWorker {
    /// Spawns the worker thread.  `on_level` runs on that thread, at most
    /// once per report interval of processed audio.
    pub fn start(
        config: LevelWorkerConfig,
        on_level: Box<dyn FnMut(LevelSample) + Send>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::spawn(move || Self::run(config, receiver, on_level));
        Self {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    fn run(
        config: LevelWorkerConfig,
        receiver: Receiver<WorkerMessage>,
        mut on_level: Box<dyn FnMut(LevelSample) + Send>,
    ) {
        let mut meter = VolumeMeter::new(config.meter);
        let interval_in_frames = (config.report_lag.as_secs_f64()
            * f64::from(meter.config().sample_rate))
        .round() as u64;
        let mut frames_since_report = 0u64;

        debug!(
            "level worker up, reporting every {} frames",
            interval_in_frames
        );

        while let Ok(message) = receiver.recv() {
            match message {
                WorkerMessage::Block(block) => {
                    let sample = meter.process(&block, Instant::now());
                    frames_since_report += block.len() as u64;
                    if frames_since_report >= interval_in_frames {
                        frames_since_report = 0;
                        on_level(sample);
                    }
                }
                WorkerMessage::Disconnect => break,
            }
        }

        // The callback dies with this scope; nothing can invoke it after
        // the worker wound down.
        debug!("level worker down");
    }

    /// Cloneable block producer handle.
    pub fn feed(&self) -> Result<LevelFeed, WorkerError> {
        match &self.sender {
            Some(sender) => Ok(LevelFeed {
                sender: sender.clone(),
            }),
            None => Err(WorkerError::Disconnected),
        }
    }

    /// Queues one block of mono PCM for metering.  A no-op once
    /// disconnected.
    pub fn process(&self, block: Vec<f32>) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(WorkerMessage::Block(block));
        }
    }

    /// Stops the worker thread and drops the callback.  Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(WorkerMessage::Disconnect);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("level worker thread panicked");
            }
        }
    }
}

impl Drop for LevelWorker {
    fn drop(&mut self) {
        self.disconnect();
    }
}
