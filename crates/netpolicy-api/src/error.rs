// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Netpolicy Contributors

//! The error taxonomy shared across the workspace.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// An error returned by a netpolicy operation.
///
/// Each variant carries enough context to identify the failed operation
/// without reference to engine internals; `to_errno()` gives the
/// C-compatible mapping used at the control-plane boundary.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum NetPolicyError {
    /// A caller-supplied argument failed validation. No state was
    /// modified.
    InvalidArgument(String),

    /// The named entry does not exist.
    NotFound(String),

    /// A counter in the subtrahend exceeded its counterpart in the
    /// minuend during strict snapshot subtraction.
    MonotonicityViolation(String),

    /// The backing map or transport is not available.
    BackendUnavailable(String),

    /// The operation is not supported by this backend.
    Unsupported(String),

    /// A bounded table is full.
    MaxCapacity(u64),
}

impl NetPolicyError {
    pub fn to_errno(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => libc::EINVAL,
            Self::NotFound(_) => libc::ENOENT,
            Self::MonotonicityViolation(_) => libc::EINVAL,
            Self::BackendUnavailable(_) => libc::ENODEV,
            Self::Unsupported(_) => libc::EOPNOTSUPP,
            Self::MaxCapacity(_) => libc::ENFILE,
        }
    }
}

impl Display for NetPolicyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => {
                write!(f, "invalid argument: {}", msg)
            }
            Self::NotFound(msg) => write!(f, "not found: {}", msg),
            Self::MonotonicityViolation(msg) => {
                write!(f, "monotonicity violation: {}", msg)
            }
            Self::BackendUnavailable(msg) => {
                write!(f, "backend unavailable: {}", msg)
            }
            Self::Unsupported(msg) => write!(f, "unsupported: {}", msg),
            Self::MaxCapacity(limit) => {
                write!(f, "table at max capacity: {}", limit)
            }
        }
    }
}

impl std::error::Error for NetPolicyError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn errno_mapping() {
        let e = NetPolicyError::InvalidArgument("x".to_string());
        assert_eq!(e.to_errno(), libc::EINVAL);
        let e = NetPolicyError::NotFound("x".to_string());
        assert_eq!(e.to_errno(), libc::ENOENT);
        let e = NetPolicyError::MonotonicityViolation("x".to_string());
        assert_eq!(e.to_errno(), libc::EINVAL);
        let e = NetPolicyError::BackendUnavailable("x".to_string());
        assert_eq!(e.to_errno(), libc::ENODEV);
        let e = NetPolicyError::Unsupported("x".to_string());
        assert_eq!(e.to_errno(), libc::EOPNOTSUPP);
        let e = NetPolicyError::MaxCapacity(4000);
        assert_eq!(e.to_errno(), libc::ENFILE);
    }
}
