//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The event stream consumed by the embedding UI layer.

use std::fmt;

use crate::common::{CallId, CallMediaType, ContactId, EndReason, FieldId, VolumeSample};
use crate::core::endpoint::{Endpoint, FieldEndpoint};

/// Lifecycle and media events re-emitted to the external collaborator.
/// One variant per event, each with its own typed payload.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Invite sent / answer sent, before any network ack.
    InProgress { call_id: CallId },

    /// The remote party's ring was confirmed by the signaling path.
    Ringing { field_id: FieldId },

    /// An inbound invite arrived while idle.
    NewCall {
        call_id: CallId,
        caller: ContactId,
        caller_endpoint: Endpoint,
        media_type: CallMediaType,
    },

    /// The media path is established.
    Connected { field_id: FieldId, peer: ContactId },

    /// A participant joined an active field.
    Arrived { endpoint: FieldEndpoint },

    /// A participant left an active field.
    Left { endpoint: FieldEndpoint },

    /// A volume sample was produced for a tracked endpoint.
    MicrophoneVolume { sample: VolumeSample },

    /// The callee was already in another call.
    Busy,

    /// Ringing or answer wait exceeded its deadline.
    Timeout,

    /// Either side ended the call normally.  The field id is absent when
    /// the call ended before a field existed (e.g. a declined invite).
    Bye { field_id: Option<FieldId> },

    /// Negotiation or transport error.
    CallFailed { reason: EndReason },
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SessionEvent::InProgress { .. } => "InProgress",
            SessionEvent::Ringing { .. } => "Ringing",
            SessionEvent::NewCall { .. } => "NewCall",
            SessionEvent::Connected { .. } => "Connected",
            SessionEvent::Arrived { .. } => "Arrived",
            SessionEvent::Left { .. } => "Left",
            SessionEvent::MicrophoneVolume { .. } => "MicrophoneVolume",
            SessionEvent::Busy => "Busy",
            SessionEvent::Timeout => "Timeout",
            SessionEvent::Bye { .. } => "Bye",
            SessionEvent::CallFailed { .. } => "CallFailed",
        };
        write!(f, "{}", name)
    }
}

/// The callbacks from the session to its observer.  All run on the
/// session's actor thread; implementations only record or enqueue.
pub trait SessionObserver: Send {
    fn handle_event(&self, event: SessionEvent);

    /// The last callback for a call: every resource is released and the
    /// session is Idle again.
    fn handle_ended(&self, reason: EndReason);
}
