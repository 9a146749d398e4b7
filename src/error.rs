use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Invalid reason '{0}': must be at least 3 characters of [A-Za-z0-9_-]")]
    InvalidReason(String),

    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("Invalid prefix length: {0}")]
    InvalidPrefix(String),

    #[error("Unknown required range: {0}")]
    UnknownRange(String),

    #[error("No available address of size /{0}")]
    PoolExhausted(u8),

    #[error("CIDR {0} overlaps already occupied {1}")]
    Overlap(String, String),

    #[error("CIDR {0} is not in the occupied list")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl From<ipnet::AddrParseError> for Error {
    fn from(e: ipnet::AddrParseError) -> Self {
        Error::InvalidCidr(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}
