//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! # VU Meter
//!
//! Smoothed RMS audio level metering for speaking indicators.
//!
//! [`VolumeMeter`] reduces successive blocks of mono PCM samples to a
//! smoothed volume value with a clipping flag ("fast attack, slow
//! release").  [`LevelWorker`] runs the same meter on a dedicated thread,
//! decoupled from the caller, and reports level samples at a bounded
//! cadence.

#[macro_use]
extern crate log;

mod meter;
mod worker;

pub use meter::{LevelSample, MeterConfig, VolumeMeter};
pub use worker::{LevelFeed, LevelWorker, LevelWorkerConfig, WorkerError};
