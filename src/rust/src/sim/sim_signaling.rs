//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Simulation signaling sender: counts what was sent and keeps the
//! latest message of each kind for assertions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::{ContactId, GroupId, Result};
use crate::core::signaling::{Accept, Busy, Hangup, Invite, RingConfirm, Signaler};
use crate::sim::error::SimError;

#[derive(Default)]
struct SimSignalerShared {
    should_fail: AtomicBool,

    invites_sent: AtomicUsize,
    group_invites_sent: AtomicUsize,
    rings_sent: AtomicUsize,
    accepts_sent: AtomicUsize,
    hangups_sent: AtomicUsize,
    busys_sent: AtomicUsize,

    last_invite: Mutex<Option<(String, Invite)>>,
    last_accept: Mutex<Option<(ContactId, Accept)>>,
    last_hangup: Mutex<Option<(ContactId, Hangup)>>,
    last_busy: Mutex<Option<(ContactId, Busy)>>,
}

/// Cloneable handle; every clone observes the same counters.
#[derive(Clone, Default)]
pub struct SimSignaler {
    shared: Arc<SimSignalerShared>,
}

impl SimSignaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every send fails, exercising the signaling error paths.
    pub fn set_should_fail(&self, fail: bool) {
        self.shared.should_fail.store(fail, Ordering::SeqCst);
    }

    fn failing(&self) -> bool {
        self.shared.should_fail.load(Ordering::SeqCst)
    }

    pub fn invites_sent(&self) -> usize {
        self.shared.invites_sent.load(Ordering::SeqCst)
    }

    pub fn group_invites_sent(&self) -> usize {
        self.shared.group_invites_sent.load(Ordering::SeqCst)
    }

    pub fn rings_sent(&self) -> usize {
        self.shared.rings_sent.load(Ordering::SeqCst)
    }

    pub fn accepts_sent(&self) -> usize {
        self.shared.accepts_sent.load(Ordering::SeqCst)
    }

    pub fn hangups_sent(&self) -> usize {
        self.shared.hangups_sent.load(Ordering::SeqCst)
    }

    pub fn busys_sent(&self) -> usize {
        self.shared.busys_sent.load(Ordering::SeqCst)
    }

    /// Recipient (contact or group id) and body of the latest invite.
    pub fn last_invite(&self) -> Option<(String, Invite)> {
        self.shared.last_invite.lock().ok()?.clone()
    }

    pub fn last_accept(&self) -> Option<(ContactId, Accept)> {
        self.shared.last_accept.lock().ok()?.clone()
    }

    pub fn last_hangup(&self) -> Option<(ContactId, Hangup)> {
        self.shared.last_hangup.lock().ok()?.clone()
    }

    pub fn last_busy(&self) -> Option<(ContactId, Busy)> {
        self.shared.last_busy.lock().ok()?.clone()
    }
}

impl Signaler for SimSignaler {
    fn send_invite(&self, to: &ContactId, invite: Invite) -> Result<()> {
        info!("sim: send_invite(): to: {}, call_id: {}", to, invite.call_id);
        if self.failing() {
            return Err(SimError::SendInviteError.into());
        }
        self.shared.invites_sent.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.shared.last_invite.lock() {
            *last = Some((to.clone(), invite));
        }
        Ok(())
    }

    fn send_group_invite(&self, group: &GroupId, invite: Invite) -> Result<()> {
        info!(
            "sim: send_group_invite(): group: {}, call_id: {}",
            group, invite.call_id
        );
        if self.failing() {
            return Err(SimError::SendInviteError.into());
        }
        self.shared.group_invites_sent.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.shared.last_invite.lock() {
            *last = Some((group.clone(), invite));
        }
        Ok(())
    }

    fn send_ring(&self, to: &ContactId, ring: RingConfirm) -> Result<()> {
        info!("sim: send_ring(): to: {}, call_id: {}", to, ring.call_id);
        if self.failing() {
            return Err(SimError::SendRingError.into());
        }
        self.shared.rings_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn send_accept(&self, to: &ContactId, accept: Accept) -> Result<()> {
        info!("sim: send_accept(): to: {}, call_id: {}", to, accept.call_id);
        if self.failing() {
            return Err(SimError::SendAcceptError.into());
        }
        self.shared.accepts_sent.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.shared.last_accept.lock() {
            *last = Some((to.clone(), accept));
        }
        Ok(())
    }

    fn send_hangup(&self, to: &ContactId, hangup: Hangup) -> Result<()> {
        info!("sim: send_hangup(): to: {}, call_id: {}", to, hangup.call_id);
        if self.failing() {
            return Err(SimError::SendHangupError.into());
        }
        self.shared.hangups_sent.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.shared.last_hangup.lock() {
            *last = Some((to.clone(), hangup));
        }
        Ok(())
    }

    fn send_busy(&self, to: &ContactId, busy: Busy) -> Result<()> {
        info!("sim: send_busy(): to: {}, call_id: {}", to, busy.call_id);
        if self.failing() {
            return Err(SimError::SendBusyError.into());
        }
        self.shared.busys_sent.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.shared.last_busy.lock() {
            *last = Some((to.clone(), busy));
        }
        Ok(())
    }
}
