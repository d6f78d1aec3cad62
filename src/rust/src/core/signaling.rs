//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Typed signaling messages and the outbound send seam.
//!
//! The payloads here are what the core needs for its state machine; the
//! embedding transport wraps them however it likes.  Session descriptions
//! and ICE never appear -- they live entirely below the [`crate::media`]
//! boundary.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::{CallId, CallMediaType, ContactId, GroupId, Result};
use crate::core::endpoint::Endpoint;

/// An invitation to join a call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    pub call_id: CallId,
    pub caller: ContactId,
    pub caller_endpoint: Endpoint,
    pub media_type: CallMediaType,
    /// Approximate age of the message at delivery time; stale invites are
    /// dropped instead of ringing.
    pub age: Duration,
    /// Present for group calls.
    pub group: Option<GroupId>,
}

/// Confirmation that the callee's side is ringing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingConfirm {
    pub call_id: CallId,
}

/// The callee accepted the call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accept {
    pub call_id: CallId,
    pub callee: ContactId,
    pub callee_endpoint: Endpoint,
}

/// Either side ends or declines the call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hangup {
    pub call_id: CallId,
}

/// The callee was already in another call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Busy {
    pub call_id: CallId,
}

/// A participant joined the call context (group roster announcement).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arrival {
    pub call_id: CallId,
    pub contact: ContactId,
    pub endpoint: Endpoint,
}

/// A participant left the call context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Departure {
    pub call_id: CallId,
    pub contact: ContactId,
}

/// Outbound signaling, implemented by the embedding transport.
/// A send failure must be reported; the core never ignores one.
pub trait Signaler: Send {
    fn send_invite(&self, to: &ContactId, invite: Invite) -> Result<()>;
    fn send_group_invite(&self, group: &GroupId, invite: Invite) -> Result<()>;
    fn send_ring(&self, to: &ContactId, ring: RingConfirm) -> Result<()>;
    fn send_accept(&self, to: &ContactId, accept: Accept) -> Result<()>;
    fn send_hangup(&self, to: &ContactId, hangup: Hangup) -> Result<()>;
    fn send_busy(&self, to: &ContactId, busy: Busy) -> Result<()>;
}
