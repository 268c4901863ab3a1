//! Error classification: is a failed service call worth retrying?
//!
//! Rate limits, server-side overload and dropped connections are expected
//! under sustained concurrent load and clear up on their own, so they are
//! **transient**. Everything else (bad request, auth, billing quota, unknown
//! failures) is **permanent**: repeating the identical request would burn another slot of
//! the provider's error budget and fail the same way.

use crate::error::ServiceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Retry eligibility of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Transient,
    Permanent,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => f.write_str("transient"),
            ErrorClass::Permanent => f.write_str("permanent"),
        }
    }
}

/// Anything the retry policy can reason about.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    /// Minimum wait the remote side asked for, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Label a service error. Pure function of the error value.
pub fn classify(error: &ServiceError) -> ErrorClass {
    match error {
        ServiceError::RateLimited { .. } => ErrorClass::Transient,
        ServiceError::Timeout { .. } => ErrorClass::Transient,
        ServiceError::Network { .. } => ErrorClass::Transient,
        ServiceError::Unavailable { .. } => ErrorClass::Transient,
        ServiceError::Rejected { .. } => ErrorClass::Permanent,
        ServiceError::Status { code, .. } if *code == 429 || (500..600).contains(code) => {
            ErrorClass::Transient
        }
        ServiceError::Status { .. } => ErrorClass::Permanent,
        ServiceError::QuotaExhausted { .. } => ErrorClass::Permanent,
        ServiceError::Other(_) => ErrorClass::Permanent,
    }
}

impl Classify for ServiceError {
    fn class(&self) -> ErrorClass {
        classify(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ServiceError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
