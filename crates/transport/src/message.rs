//! Wire messages and their framing.
//!
//! A frame is a 4 byte big-endian payload length followed by the bincode encoded payload.

use bytes::Bytes;
use chord_core::dht::Did;
use chord_core::dht::LookupMetaData;
use chord_core::dht::Vnode;
use chord_core::error::Error as ChordError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::error::Error;
use crate::error::Result;

/// A call from one host to a vnode served by another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcRequest {
    ListVnodes {
        host: String,
    },
    Ping {
        vnode: Vnode,
    },
    GetPredecessor {
        vnode: Vnode,
    },
    Notify {
        target: Vnode,
        candidate: Vnode,
    },
    FindSuccessors {
        target: Vnode,
        n: usize,
        key: Did,
        meta: LookupMetaData,
    },
    ClearPredecessor {
        target: Vnode,
        vnode: Vnode,
    },
    SkipSuccessor {
        target: Vnode,
        vnode: Vnode,
    },
}

impl RpcRequest {
    /// Name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            RpcRequest::ListVnodes { .. } => "ListVnodes",
            RpcRequest::Ping { .. } => "Ping",
            RpcRequest::GetPredecessor { .. } => "GetPredecessor",
            RpcRequest::Notify { .. } => "Notify",
            RpcRequest::FindSuccessors { .. } => "FindSuccessors",
            RpcRequest::ClearPredecessor { .. } => "ClearPredecessor",
            RpcRequest::SkipSuccessor { .. } => "SkipSuccessor",
        }
    }
}

/// Failure of a call on the serving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteError {
    /// The target vnode is not registered on the host.
    UnknownVnode(Vnode),
    /// Routing gave up after this many hops.
    RoutingExhausted(u32),
    Other(String),
}

impl From<&ChordError> for RemoteError {
    fn from(e: &ChordError) -> Self {
        match e {
            ChordError::RoutingExhausted(hops) => RemoteError::RoutingExhausted(*hops),
            e => RemoteError::Other(e.to_string()),
        }
    }
}

impl RemoteError {
    /// Turn the answer of `host` back into an engine error.
    pub fn into_chord_error(self, host: &str) -> ChordError {
        match self {
            RemoteError::UnknownVnode(v) => {
                ChordError::Unreachable(format!("{} is not served by {}", v, host))
            }
            RemoteError::RoutingExhausted(hops) => ChordError::RoutingExhausted(hops),
            RemoteError::Other(msg) => ChordError::Remote(host.to_string(), msg),
        }
    }
}

/// Answer to a [RpcRequest].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcResponse {
    Vnodes(Vec<Vnode>),
    Pong(bool),
    Predecessor(Option<Vnode>),
    /// Successor list after a notify.
    Successors(Vec<Vnode>),
    /// Result of a lookup together with the bookkeeping of the remote part of the walk.
    Found {
        result: std::result::Result<Vec<Vnode>, RemoteError>,
        meta: LookupMetaData,
    },
    Done,
    Error(RemoteError),
}

/// Encode `msg` as one frame.
pub fn encode<T: Serialize>(msg: &T, max_frame_size: usize) -> Result<Bytes> {
    let payload = bincode::serialize(msg)?;
    if payload.len() > max_frame_size {
        return Err(Error::FrameTooLarge(payload.len()));
    }
    let mut buf = Vec::with_capacity(payload.len() + 4);
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(Bytes::from(buf))
}

/// Write `msg` as one frame.
pub async fn write_frame<W, T>(w: &mut W, msg: &T, max_frame_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(msg, max_frame_size)?;
    w.write_all(&frame).await?;
    w.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean end of stream before the length prefix.
pub async fn read_frame<R, T>(r: &mut R, max_frame_size: usize) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame_size {
        return Err(Error::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await?;
    Ok(Some(bincode::deserialize(&payload)?))
}
