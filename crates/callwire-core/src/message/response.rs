//! Outcome of a request.

use crate::error::{CallwireError, Result};
use serde::{Deserialize, Serialize};

/// Response status. Numeric values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum StatusCode {
    Unknown,
    Ok,
    BadRequest,
    InternalServerError,
    Unauthorized,
}

impl StatusCode {
    pub fn code(self) -> u16 {
        match self {
            StatusCode::Unknown => 0,
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::InternalServerError => 500,
            StatusCode::Unauthorized => 561,
        }
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        match code {
            200 => StatusCode::Ok,
            400 => StatusCode::BadRequest,
            500 => StatusCode::InternalServerError,
            561 => StatusCode::Unauthorized,
            _ => StatusCode::Unknown,
        }
    }
}

impl From<StatusCode> for u16 {
    fn from(status: StatusCode) -> Self {
        status.code()
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:?}", self.code(), self)
    }
}

/// Result of dispatching one request.
///
/// `payload` is present exactly when `status` is `Ok`; every other status
/// carries `error_message` and optionally `error_detail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl Response {
    /// Create a success response.
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            status: StatusCode::Ok,
            payload: Some(payload),
            error_message: None,
            error_detail: None,
        }
    }

    /// Create an error response. `Ok` is not an error status and is mapped to
    /// `InternalServerError`.
    pub fn error(status: StatusCode, message: impl Into<String>, detail: Option<String>) -> Self {
        let status = if status == StatusCode::Ok {
            StatusCode::InternalServerError
        } else {
            status
        };
        Self {
            status,
            payload: None,
            error_message: Some(message.into()),
            error_detail: detail,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::error(StatusCode::BadRequest, message, None)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::error(StatusCode::Unauthorized, message, None)
    }

    pub fn internal_error(message: impl Into<String>, detail: Option<String>) -> Self {
        Self::error(StatusCode::InternalServerError, message, detail)
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }

    /// Check the payload/status invariant of a decoded response.
    pub fn validate(&self) -> Result<()> {
        match (self.status, &self.payload, &self.error_message) {
            (StatusCode::Ok, Some(_), _) => Ok(()),
            (StatusCode::Ok, None, _) => {
                Err(CallwireError::protocol("Ok response without payload"))
            }
            (_, Some(_), _) => Err(CallwireError::protocol(format!(
                "{} response carries a payload",
                self.status
            ))),
            (_, None, None) => Err(CallwireError::protocol(format!(
                "{} response without error message",
                self.status
            ))),
            (_, None, Some(_)) => Ok(()),
        }
    }

    /// Turn the response into its payload, or a fault for non-Ok statuses.
    pub fn into_payload(self) -> Result<Vec<u8>> {
        match self.status {
            StatusCode::Ok => self
                .payload
                .ok_or_else(|| CallwireError::protocol("Ok response without payload")),
            status => Err(CallwireError::Fault {
                status,
                message: self.error_message.unwrap_or_default(),
                detail: self.error_detail,
            }),
        }
    }
}
