#![allow(missing_docs)]

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Call to {0} timed out")]
    Timeout(String),

    #[error("Frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("Connection to {0} closed")]
    ConnectionClosed(String),

    #[error("Unexpected response to {0}")]
    UnexpectedResponse(&'static str),

    #[error("Remote {0} failed: {1}")]
    Remote(String, String),

    #[error("Vnode {0} is not served by this host")]
    VnodeNotFound(String),

    #[error("Transport is shut down")]
    Shutdown,
}

impl From<Error> for chord_core::error::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(_) | Error::Timeout(_) | Error::ConnectionClosed(_) | Error::Shutdown => {
                chord_core::error::Error::Unreachable(e.to_string())
            }
            Error::Remote(host, msg) => chord_core::error::Error::Remote(host, msg),
            e => chord_core::error::Error::Transport(e.to_string()),
        }
    }
}
