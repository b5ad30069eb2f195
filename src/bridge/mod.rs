// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The enclave bridge: the only way into a trust boundary.
//!
//! ## Security Model
//!
//! - Every operation crosses as one framed call (`opcode ‖ JSON payload`)
//!   through [`EnclaveBridge`]. Frames are length-capped and fully
//!   validated before anything inside the boundary runs.
//! - One call is inside an instance at a time. Instances share no state.
//! - Errors leave the boundary as `{errorKind, message}` with messages cut
//!   to one line and scrubbed of secret values.
//! - A panic inside the boundary poisons that instance only. The host
//!   process keeps serving from the others.

pub mod attestation;
pub mod codec;
pub mod instance;
pub mod opcode;
pub mod pool;
pub mod worker;

pub use attestation::{verify_report, AttestationError, AttestationReport, Attestor};
pub use codec::{decode_frame, encode_frame, encode_request, BridgeResponse, Frame, WireError};
pub use instance::{BoundaryInstance, FunctionInfo};
pub use opcode::Opcode;
pub use pool::BoundaryPool;
pub use worker::EnclaveBridge;
