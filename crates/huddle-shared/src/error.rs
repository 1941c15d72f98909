use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    /// Self-DM, or one side of the pair has no identity.
    #[error("{0}")]
    InvalidDmTarget(&'static str),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}
