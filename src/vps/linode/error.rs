//! Errors reported inside the Linode API envelope.

use serde::Deserialize;
use thiserror::Error;

/// First entry of a non-empty `ERRORARRAY`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("linode {action} failed with code {code}: {message}")]
pub struct LinodeApiError {
    pub code: i64,
    pub message: String,
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEntry {
    #[serde(rename = "ERRORCODE")]
    pub code: i64,
    #[serde(rename = "ERRORMESSAGE", default)]
    pub message: String,
}

impl ErrorEntry {
    pub(crate) fn into_error(self, action: &str) -> LinodeApiError {
        LinodeApiError {
            code: self.code,
            message: self.message,
            action: action.to_string(),
        }
    }
}
