//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Simulation error codes, for injecting failures in tests.

use thiserror::Error;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum SimError {
    #[error("sim: open capture failed")]
    OpenCaptureError,
    #[error("sim: create peer connection failed")]
    CreateConnectionError,
    #[error("sim: negotiate failed")]
    NegotiateError,
    #[error("sim: send invite failed")]
    SendInviteError,
    #[error("sim: send ring failed")]
    SendRingError,
    #[error("sim: send accept failed")]
    SendAcceptError,
    #[error("sim: send hangup failed")]
    SendHangupError,
    #[error("sim: send busy failed")]
    SendBusyError,
}
