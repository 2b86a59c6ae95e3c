//! [Transport] over TCP.
//!
//! The listener serves the vnodes registered on this transport. Outbound calls go through
//! the [ConnectionPool], one request frame and one response frame per checkout.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chord_core::consts::MAX_FRAME_SIZE;
use chord_core::dht::Did;
use chord_core::dht::LookupMetaData;
use chord_core::dht::Vnode;
use chord_core::error::Error as ChordError;
use chord_core::error::Result as ChordResult;
use chord_core::transport::spawn_find_successors;
use chord_core::transport::Transport;
use chord_core::transport::VnodeRpc;
use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::error::Result;
use crate::message::read_frame;
use crate::message::write_frame;
use crate::message::RemoteError;
use crate::message::RpcRequest;
use crate::message::RpcResponse;
use crate::pool::ConnectionPool;

/// Tunables of a [TcpTransport].
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Deadline of one outbound call, connect included.
    pub timeout: Duration,
    /// Idle streams kept per remote host.
    pub max_idle: usize,
    /// Largest frame accepted in either direction.
    pub max_frame_size: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_idle: 2,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

struct Inner {
    addr: String,
    local: DashMap<Did, (Vnode, Arc<dyn VnodeRpc>)>,
    pool: ConnectionPool,
    config: TcpConfig,
    token: CancellationToken,
}

/// A host on the ring, reachable at [TcpTransport::addr].
///
/// Vnodes served here must carry [TcpTransport::addr] as their host, so use it as the
/// `hostname` of the ring config.
pub struct TcpTransport {
    inner: Arc<Inner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Listen on `listen` and start serving.
    pub async fn bind(listen: &str, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(listen).await?;
        let addr = listener.local_addr()?.to_string();
        tracing::info!("[tcp] listening on {}", addr);
        let inner = Arc::new(Inner {
            addr,
            local: DashMap::new(),
            pool: ConnectionPool::new(config.max_idle),
            config,
            token: CancellationToken::new(),
        });
        let handle = tokio::spawn(listen_loop(inner.clone(), listener));
        Ok(Self {
            inner,
            listener: Mutex::new(Some(handle)),
        })
    }

    /// The `host:port` peers reach this transport at.
    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Stop listening, drop pooled streams and fail every further call.
    pub async fn shutdown(&self) {
        self.inner.token.cancel();
        self.inner.pool.clear();
        let handle = self.listener.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("[tcp] listener of {} ended badly: {:?}", self.inner.addr, e);
            }
        }
    }

    async fn call(&self, host: &str, req: RpcRequest) -> Result<RpcResponse> {
        if self.inner.token.is_cancelled() {
            return Err(Error::Shutdown);
        }
        let name = req.name();
        match tokio::time::timeout(self.inner.config.timeout, self.exchange(host, &req)).await {
            Ok(ret) => ret,
            Err(_) => Err(Error::Timeout(format!("{} on {}", name, host))),
        }
    }

    async fn exchange(&self, host: &str, req: &RpcRequest) -> Result<RpcResponse> {
        let max = self.inner.config.max_frame_size;
        // a pooled stream may have been closed by the peer in the meantime
        if let Some(mut stream) = self.inner.pool.take(host) {
            match round_trip(&mut stream, host, req, max).await {
                Ok(resp) => {
                    self.inner.pool.put(host, stream);
                    return Ok(resp);
                }
                Err(e) => {
                    tracing::debug!("[tcp] stale stream to {}: {:?}", host, e);
                    self.inner.pool.evict(host);
                }
            }
        }
        let mut stream = TcpStream::connect(host).await?;
        stream.set_nodelay(true)?;
        let resp = round_trip(&mut stream, host, req, max).await?;
        self.inner.pool.put(host, stream);
        Ok(resp)
    }

    /// Handler of `vnode` when it is served by this very transport.
    fn local_handler(&self, vnode: &Vnode) -> Option<Arc<dyn VnodeRpc>> {
        if vnode.host != self.inner.addr {
            return None;
        }
        self.inner.handler(&vnode.id)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.inner.token.cancel();
    }
}

impl Inner {
    fn handler(&self, id: &Did) -> Option<Arc<dyn VnodeRpc>> {
        self.local.get(id).map(|e| e.value().1.clone())
    }

    fn vnodes(&self) -> Vec<Vnode> {
        let mut vnodes: Vec<Vnode> = self.local.iter().map(|e| e.value().0.clone()).collect();
        vnodes.sort_by(|a, b| a.id.cmp(&b.id));
        vnodes
    }

    async fn handle(&self, req: RpcRequest) -> RpcResponse {
        match req {
            RpcRequest::ListVnodes { .. } => RpcResponse::Vnodes(self.vnodes()),
            RpcRequest::Ping { vnode } => RpcResponse::Pong(self.local.contains_key(&vnode.id)),
            RpcRequest::GetPredecessor { vnode } => match self.handler(&vnode.id) {
                None => RpcResponse::Error(RemoteError::UnknownVnode(vnode)),
                Some(h) => match h.get_predecessor().await {
                    Ok(p) => RpcResponse::Predecessor(p),
                    Err(e) => RpcResponse::Error((&e).into()),
                },
            },
            RpcRequest::Notify { target, candidate } => match self.handler(&target.id) {
                None => RpcResponse::Error(RemoteError::UnknownVnode(target)),
                Some(h) => match h.notify(&candidate).await {
                    Ok(succs) => RpcResponse::Successors(succs),
                    Err(e) => RpcResponse::Error((&e).into()),
                },
            },
            RpcRequest::FindSuccessors {
                target,
                n,
                key,
                mut meta,
            } => match self.handler(&target.id) {
                None => RpcResponse::Error(RemoteError::UnknownVnode(target)),
                Some(h) => {
                    let result = h
                        .find_successors(n, &key, &mut meta)
                        .await
                        .map_err(|e| RemoteError::from(&e));
                    RpcResponse::Found { result, meta }
                }
            },
            RpcRequest::ClearPredecessor { target, vnode } => match self.handler(&target.id) {
                None => RpcResponse::Error(RemoteError::UnknownVnode(target)),
                Some(h) => done(h.clear_predecessor(&vnode).await),
            },
            RpcRequest::SkipSuccessor { target, vnode } => match self.handler(&target.id) {
                None => RpcResponse::Error(RemoteError::UnknownVnode(target)),
                Some(h) => done(h.skip_successor(&vnode).await),
            },
        }
    }
}

fn done(ret: ChordResult<()>) -> RpcResponse {
    match ret {
        Ok(()) => RpcResponse::Done,
        Err(e) => RpcResponse::Error((&e).into()),
    }
}

async fn round_trip(
    stream: &mut TcpStream,
    host: &str,
    req: &RpcRequest,
    max: usize,
) -> Result<RpcResponse> {
    write_frame(stream, req, max).await?;
    read_frame(stream, max)
        .await?
        .ok_or_else(|| Error::ConnectionClosed(host.to_string()))
}

async fn listen_loop(inner: Arc<Inner>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = inner.token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve(inner.clone(), stream, peer));
                }
                Err(e) => tracing::warn!("[tcp] accept on {} failed: {:?}", inner.addr, e),
            },
        }
    }
    tracing::info!("[tcp] {} stopped listening", inner.addr);
}

/// Answer frames on one inbound stream until the peer hangs up.
async fn serve(inner: Arc<Inner>, mut stream: TcpStream, peer: SocketAddr) {
    let max = inner.config.max_frame_size;
    loop {
        let req: RpcRequest = tokio::select! {
            _ = inner.token.cancelled() => return,
            frame = read_frame(&mut stream, max) => match frame {
                Ok(Some(req)) => req,
                Ok(None) => return,
                Err(e) => {
                    tracing::debug!("[tcp] bad frame from {}: {:?}", peer, e);
                    return;
                }
            },
        };
        tracing::trace!("[tcp] {} from {}", req.name(), peer);
        let resp = inner.handle(req).await;
        if let Err(e) = write_frame(&mut stream, &resp, max).await {
            tracing::debug!("[tcp] failed to answer {}: {:?}", peer, e);
            return;
        }
    }
}

fn unexpected(call: &'static str) -> ChordError {
    Error::UnexpectedResponse(call).into()
}

#[async_trait]
impl Transport for TcpTransport {
    async fn list_vnodes(&self, host: &str) -> ChordResult<Vec<Vnode>> {
        if host == self.inner.addr {
            return Ok(self.inner.vnodes());
        }
        let req = RpcRequest::ListVnodes {
            host: host.to_string(),
        };
        match self.call(host, req).await? {
            RpcResponse::Vnodes(vnodes) => Ok(vnodes),
            RpcResponse::Error(e) => Err(e.into_chord_error(host)),
            _ => Err(unexpected("ListVnodes")),
        }
    }

    async fn ping(&self, vnode: &Vnode) -> ChordResult<bool> {
        if vnode.host == self.inner.addr {
            return Ok(self.inner.local.contains_key(&vnode.id));
        }
        let req = RpcRequest::Ping {
            vnode: vnode.clone(),
        };
        match self.call(&vnode.host, req).await? {
            RpcResponse::Pong(alive) => Ok(alive),
            RpcResponse::Error(e) => Err(e.into_chord_error(&vnode.host)),
            _ => Err(unexpected("Ping")),
        }
    }

    async fn get_predecessor(&self, vnode: &Vnode) -> ChordResult<Option<Vnode>> {
        if let Some(h) = self.local_handler(vnode) {
            return h.get_predecessor().await;
        }
        let req = RpcRequest::GetPredecessor {
            vnode: vnode.clone(),
        };
        match self.call(&vnode.host, req).await? {
            RpcResponse::Predecessor(p) => Ok(p),
            RpcResponse::Error(e) => Err(e.into_chord_error(&vnode.host)),
            _ => Err(unexpected("GetPredecessor")),
        }
    }

    async fn notify(&self, target: &Vnode, candidate: &Vnode) -> ChordResult<Vec<Vnode>> {
        if let Some(h) = self.local_handler(target) {
            return h.notify(candidate).await;
        }
        let req = RpcRequest::Notify {
            target: target.clone(),
            candidate: candidate.clone(),
        };
        match self.call(&target.host, req).await? {
            RpcResponse::Successors(succs) => Ok(succs),
            RpcResponse::Error(e) => Err(e.into_chord_error(&target.host)),
            _ => Err(unexpected("Notify")),
        }
    }

    async fn find_successors(
        &self,
        target: &Vnode,
        n: usize,
        key: &Did,
        meta: &mut LookupMetaData,
    ) -> ChordResult<Vec<Vnode>> {
        if let Some(h) = self.local_handler(target) {
            return spawn_find_successors(h, n, key, meta).await;
        }
        let req = RpcRequest::FindSuccessors {
            target: target.clone(),
            n,
            key: key.clone(),
            meta: meta.clone(),
        };
        match self.call(&target.host, req).await? {
            RpcResponse::Found {
                result,
                meta: remote,
            } => {
                *meta = remote;
                result.map_err(|e| e.into_chord_error(&target.host))
            }
            RpcResponse::Error(e) => Err(e.into_chord_error(&target.host)),
            _ => Err(unexpected("FindSuccessors")),
        }
    }

    async fn clear_predecessor(&self, target: &Vnode, vnode: &Vnode) -> ChordResult<()> {
        if let Some(h) = self.local_handler(target) {
            return h.clear_predecessor(vnode).await;
        }
        let req = RpcRequest::ClearPredecessor {
            target: target.clone(),
            vnode: vnode.clone(),
        };
        match self.call(&target.host, req).await? {
            RpcResponse::Done => Ok(()),
            RpcResponse::Error(e) => Err(e.into_chord_error(&target.host)),
            _ => Err(unexpected("ClearPredecessor")),
        }
    }

    async fn skip_successor(&self, target: &Vnode, vnode: &Vnode) -> ChordResult<()> {
        if let Some(h) = self.local_handler(target) {
            return h.skip_successor(vnode).await;
        }
        let req = RpcRequest::SkipSuccessor {
            target: target.clone(),
            vnode: vnode.clone(),
        };
        match self.call(&target.host, req).await? {
            RpcResponse::Done => Ok(()),
            RpcResponse::Error(e) => Err(e.into_chord_error(&target.host)),
            _ => Err(unexpected("SkipSuccessor")),
        }
    }

    fn register(&self, vnode: &Vnode, handler: Arc<dyn VnodeRpc>) -> ChordResult<()> {
        if vnode.host != self.inner.addr {
            tracing::warn!(
                "[tcp] {} registered on {}, peers will not reach it",
                vnode,
                self.inner.addr
            );
        }
        self.inner
            .local
            .insert(vnode.id.clone(), (vnode.clone(), handler));
        Ok(())
    }

    fn deregister(&self, vnode: &Vnode) -> ChordResult<()> {
        self.inner.local.remove(&vnode.id);
        Ok(())
    }
}
