//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Common error codes.

use thiserror::Error;

use crate::common::{CallId, CallState};

/// Transport independent error conditions.
#[derive(Error, Debug)]
pub enum FieldRtcError {
    // Project wide common error codes
    #[error("mutex poisoned: {0}")]
    MutexPoisoned(String),
    #[error("expecting non-none option value in: {0}, var: {1}")]
    OptionValueNotSet(String, String),
    #[error("couldn't register an actor")]
    RegisterActor,
    #[error("call session is shut down")]
    SessionShutdown,

    // Call session error codes
    #[error("active call already in progress, id: {0}")]
    CallAlreadyInProgress(CallId),
    #[error("no active call found")]
    NoActiveCall,
    #[error("no pending incoming call")]
    NoPendingCall,
    #[error("operation not valid in state {0}")]
    InvalidStateForOperation(CallState),

    // Media error codes
    #[error("no suitable capture device: {0}")]
    NoSuitableDevice(String),
    #[error("media negotiation failed: {0}")]
    NegotiationFailed(String),
    #[error("no media connection bound for remote: {0}")]
    NoMediaConnection(String),
}
