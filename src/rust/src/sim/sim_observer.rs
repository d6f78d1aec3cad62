//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Simulation session observer: captures the event stream for
//! assertions.

use std::sync::{Arc, Mutex};

use crate::common::{EndReason, VolumeSample};
use crate::core::observer::{SessionEvent, SessionObserver};

#[derive(Default)]
struct SimObserverShared {
    events: Mutex<Vec<SessionEvent>>,
    ended: Mutex<Vec<EndReason>>,
}

/// Cloneable handle; every clone reads the same captured stream.
#[derive(Clone, Default)]
pub struct SimObserver {
    shared: Arc<SimObserverShared>,
}

impl SimObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events seen so far, in delivery order.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.shared
            .events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// End reasons seen so far, in delivery order.
    pub fn ended(&self) -> Vec<EndReason> {
        self.shared
            .ended
            .lock()
            .map(|ended| ended.clone())
            .unwrap_or_default()
    }

    /// Number of events whose display name matches.
    pub fn event_count(&self, name: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.to_string() == name)
            .count()
    }

    pub fn last_event(&self) -> Option<SessionEvent> {
        self.events().pop()
    }

    /// Every volume sample delivered so far.
    pub fn volume_samples(&self) -> Vec<VolumeSample> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::MicrophoneVolume { sample } => Some(sample),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.shared.events.lock() {
            events.clear();
        }
        if let Ok(mut ended) = self.shared.ended.lock() {
            ended.clear();
        }
    }
}

impl SessionObserver for SimObserver {
    fn handle_event(&self, event: SessionEvent) {
        debug!("sim: handle_event(): {}", event);
        if let Ok(mut events) = self.shared.events.lock() {
            events.push(event);
        }
    }

    fn handle_ended(&self, reason: EndReason) {
        info!("sim: handle_ended(): {}", reason);
        if let Ok(mut ended) = self.shared.ended.lock() {
            ended.push(reason);
        }
    }
}
