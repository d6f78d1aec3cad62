//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The block-by-block loudness meter.

use std::time::{Duration, Instant};

/// Configuration for a [`VolumeMeter`].
///
/// Out-of-range values are clamped on construction rather than rejected,
/// so a bad configuration degrades to a usable meter instead of a failed
/// call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeterConfig {
    /// Sample magnitude at or above which a block counts as clipping.
    pub clip_level: f32,
    /// One-sided decay factor applied to the previous volume per block.
    pub smoothing_factor: f32,
    /// How long the clipping flag stays set after the last clipped sample.
    pub clip_lag: Duration,
    /// Sample rate of the incoming PCM, in Hz.
    pub sample_rate: u32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            clip_level: 0.98,
            smoothing_factor: 0.95,
            clip_lag: Duration::from_millis(750),
            sample_rate: 48_000,
        }
    }
}

impl MeterConfig {
    /// Returns a copy with `clip_level` and `smoothing_factor` forced into
    /// their working ranges.
    pub fn clamped(self) -> Self {
        let mut config = self;
        if !(0.0..1.0).contains(&config.smoothing_factor) {
            let clamped = config.smoothing_factor.clamp(0.0, 0.999_999);
            warn!(
                "smoothing_factor {} out of [0, 1), clamping to {}",
                config.smoothing_factor, clamped
            );
            config.smoothing_factor = clamped;
        }
        if !(0.0..=1.0).contains(&config.clip_level) || config.clip_level == 0.0 {
            let clamped = config.clip_level.clamp(f32::EPSILON, 1.0);
            warn!(
                "clip_level {} out of (0, 1], clamping to {}",
                config.clip_level, clamped
            );
            config.clip_level = clamped;
        }
        config
    }
}

/// The meter output after one block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelSample {
    /// Smoothed volume in `[0, 1]`.
    pub volume: f32,
    /// True while a clipped sample is within `clip_lag` of `now`.
    pub clipping: bool,
}

/// Computes a smoothed RMS loudness value from raw sample blocks.
///
/// Per block of `n` samples: `rms = sqrt(sum(x^2) / n)`, then
/// `volume = max(rms, previous * smoothing_factor)`, so a loud block
/// raises the level immediately while silence decays it geometrically.
/// Callers pass `now` explicitly; the meter never reads the clock itself.
#[derive(Debug)]
pub struct VolumeMeter {
    config: MeterConfig,
    volume: f32,
    last_clip: Option<Instant>,
}

impl VolumeMeter {
    pub fn new(config: MeterConfig) -> Self {
        Self {
            config: config.clamped(),
            volume: 0.0,
            last_clip: None,
        }
    }

    /// Consumes one block of mono PCM in `[-1, 1]` and returns the updated
    /// level.  An empty block contributes an RMS of zero.
    pub fn process(&mut self, samples: &[f32], now: Instant) -> LevelSample {
        let mut sum = 0.0f32;
        let mut clipped = false;
        for &x in samples {
            sum += x * x;
            if x.abs() >= self.config.clip_level {
                clipped = true;
            }
        }
        let rms = if samples.is_empty() {
            0.0
        } else {
            (sum / samples.len() as f32).sqrt()
        };

        if clipped {
            self.last_clip = Some(now);
        }

        self.volume = rms.max(self.volume * self.config.smoothing_factor);

        LevelSample {
            volume: self.volume,
            clipping: self.clipping(now),
        }
    }

    /// Current smoothed volume.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Whether the clipping indicator is still lit at `now`.
    pub fn clipping(&self, now: Instant) -> bool {
        match self.last_clip {
            Some(at) => now.saturating_duration_since(at) <= self.config.clip_lag,
            None => false,
        }
    }

    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    /// Clears the accumulated level and clip state.
    pub fn reset(&mut self) {
        self.volume = 0.0;
        self.last_clip = None;
    }
}
