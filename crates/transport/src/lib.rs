#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
pub mod error;
pub mod message;
pub mod pool;
pub mod tcp;

pub use tcp::TcpConfig;
pub use tcp::TcpTransport;
