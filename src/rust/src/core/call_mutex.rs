//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Call Mutex
///
/// Wrapper around std::sync::Mutex::lock() that on error consumes
/// the poisoned mutex and returns a simple error code.
///
use std::sync::{Mutex, MutexGuard};

use crate::common::Result;
use crate::error::FieldRtcError;

pub struct CallMutex<T: ?Sized> {
    /// Human readable label for the mutex
    label: String,
    /// The actual mutex
    mutex: Mutex<T>,
}

impl<T> CallMutex<T> {
    /// Creates a new CallMutex
    pub fn new(t: T, label: &str) -> CallMutex<T> {
        CallMutex {
            mutex: Mutex::new(t),
            label: label.to_string(),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, T>> {
        match self.mutex.lock() {
            Ok(v) => Ok(v),
            Err(_) => Err(FieldRtcError::MutexPoisoned(self.label.clone()).into()),
        }
    }
}
