use thiserror::Error;

/// Discovery transport errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("{0} packet expired")]
    Expired(&'static str),
    #[error("no outstanding request accepted {0} reply")]
    NoMatchingRequest(&'static str),
    #[error("request timed out")]
    RequestTimeout,
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
    #[error("socket error: {0}")]
    SocketError(#[from] std::io::Error),
    #[error("discovery transport shut down")]
    Shutdown,
    #[error("cannot resolve address: {0}")]
    Resolve(String),
}
