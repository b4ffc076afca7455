use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Missing or invalid share hash")]
    InvalidShare,
    #[error("Missing or invalid file path")]
    InvalidFilePath,
    #[error("Invalid response status: {status}")]
    InvalidResponseStatus { status: reqwest::StatusCode },
    #[error("Client error: {0}")]
    ClientError(#[from] reqwest::Error),
}
