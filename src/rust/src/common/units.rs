//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::cmp::{Ord, PartialEq, PartialOrd};

use serde::{Deserialize, Serialize};

/// A bandwidth figure, stored as bits per second.
#[derive(
    Debug, Copy, Clone, Eq, Ord, PartialEq, PartialOrd, Default, Serialize, Deserialize,
)]
pub struct DataRate {
    size_per_second: DataSize,
}

impl DataRate {
    pub const fn per_second(size_per_second: DataSize) -> Self {
        Self { size_per_second }
    }

    pub const fn from_bps(bps: u64) -> Self {
        Self::per_second(DataSize::from_bits(bps))
    }

    pub fn as_bps(self) -> u64 {
        self.size_per_second.as_bits()
    }

    pub const fn from_kbps(kbps: u64) -> Self {
        Self::per_second(DataSize::from_kilobits(kbps))
    }

    pub fn as_kbps(self) -> u64 {
        self.size_per_second.as_kilobits()
    }
}

#[derive(
    Debug, Copy, Clone, Eq, Ord, PartialEq, PartialOrd, Default, Serialize, Deserialize,
)]
pub struct DataSize {
    bits: u64,
}

impl DataSize {
    pub const fn per_second(self) -> DataRate {
        DataRate::per_second(self)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self { bits }
    }

    pub fn as_bits(self) -> u64 {
        self.bits
    }

    pub const fn from_kilobits(kilobits: u64) -> Self {
        Self::from_bits(kilobits * 1000)
    }

    pub fn as_kilobits(self) -> u64 {
        self.as_bits() / 1000
    }

    pub const fn from_bytes(bytes: u64) -> Self {
        Self::from_bits(bytes * 8)
    }

    pub fn as_bytes(self) -> u64 {
        self.as_bits() / 8
    }
}
