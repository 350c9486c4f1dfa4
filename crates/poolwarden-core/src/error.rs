//! Configuration error types.

use thiserror::Error;

use crate::types::NodeIndex;

/// Fatal startup errors raised while validating the configuration surface.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no backend nodes configured")]
    EmptyNodeList,

    #[error("malformed backend node entry '{entry}': {reason}")]
    MalformedNode { entry: String, reason: String },

    #[error("duplicate backend node index: {0}")]
    DuplicateIndex(NodeIndex),

    #[error("missing required credential: {0}")]
    MissingCredential(&'static str),
}
