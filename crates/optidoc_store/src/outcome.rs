//! Outcome codes of store calls.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a store call, mirroring the HTTP codes document stores use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// 200: request applied or document returned.
    Ok,
    /// 201: document created.
    Created,
    /// 304: the caller's token is current; no body was fetched.
    NotModified,
    /// 412: the expected token did not match.
    PreconditionFailed,
    /// 404: no such document.
    NotFound,
    /// 409: a document with this key already exists.
    Conflict,
}

impl StatusCode {
    /// Numeric HTTP-style code.
    pub fn code(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::NotModified => 304,
            StatusCode::PreconditionFailed => 412,
            StatusCode::NotFound => 404,
            StatusCode::Conflict => 409,
        }
    }

    /// Returns true for 2xx and 304.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            StatusCode::Ok | StatusCode::Created | StatusCode::NotModified
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::NotModified => "NotModified",
            StatusCode::PreconditionFailed => "PreconditionFailed",
            StatusCode::NotFound => "NotFound",
            StatusCode::Conflict => "Conflict",
        };
        write!(f, "{} {}", self.code(), name)
    }
}

/// Result of a store call that reached the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome<T> {
    /// Applied; carries the call's payload.
    Ok(T),
    /// Created; carries the new document.
    Created(T),
    /// Token still current, or the call changed nothing.
    NotModified,
    /// Expected token did not match the stored one.
    PreconditionFailed,
    /// No such document.
    NotFound,
    /// Key already taken.
    Conflict,
}

impl<T> StoreOutcome<T> {
    /// Status code of this outcome.
    pub fn status(&self) -> StatusCode {
        match self {
            StoreOutcome::Ok(_) => StatusCode::Ok,
            StoreOutcome::Created(_) => StatusCode::Created,
            StoreOutcome::NotModified => StatusCode::NotModified,
            StoreOutcome::PreconditionFailed => StatusCode::PreconditionFailed,
            StoreOutcome::NotFound => StatusCode::NotFound,
            StoreOutcome::Conflict => StatusCode::Conflict,
        }
    }

    /// Returns the payload of `Ok` or `Created`.
    pub fn into_value(self) -> Option<T> {
        match self {
            StoreOutcome::Ok(value) | StoreOutcome::Created(value) => Some(value),
            _ => None,
        }
    }

    /// Maps the payload, keeping the status.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StoreOutcome<U> {
        match self {
            StoreOutcome::Ok(value) => StoreOutcome::Ok(f(value)),
            StoreOutcome::Created(value) => StoreOutcome::Created(f(value)),
            StoreOutcome::NotModified => StoreOutcome::NotModified,
            StoreOutcome::PreconditionFailed => StoreOutcome::PreconditionFailed,
            StoreOutcome::NotFound => StoreOutcome::NotFound,
            StoreOutcome::Conflict => StoreOutcome::Conflict,
        }
    }
}
