use crate::utils::error::Result;
use serde::{Deserialize, Serialize};

/// What a wrapper does with a vendor failure after logging it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Return the error to the caller.
    Propagate,
    /// Return `None` in place of the result.
    Swallow,
}

impl ErrorPolicy {
    pub fn settle<T>(self, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(_) if self == ErrorPolicy::Swallow => Ok(None),
            Err(err) => Err(err),
        }
    }
}
