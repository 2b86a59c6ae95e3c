//! Chord: a ring of virtual nodes owning a circular identifier space.
//! --------------
//! - [Ring](crate::dht::Ring) owns the vnodes of one host, creates or joins a ring and
//!   answers lookups.
//! - [LocalVnode](crate::dht::LocalVnode) is the per vnode state machine: successor list,
//!   predecessor, stabilization and the RPCs served to peers.
//! - [Transport](crate::transport::Transport) is how a vnode reaches its peers. The
//!   [LocalTransport](crate::transport::LocalTransport) dispatches in-process and can host a
//!   whole simulated ring, network transports live in other crates.
//!
//! # Stabilization
//!
//! Every local vnode runs a round on its own timer, drawn between `stabilize_min_ms` and
//! `stabilize_max_ms`:
//!
//! 1. Ping the head successor, dropping dead ones and telling our predecessor to drop
//!    them too.
//! 2. Ask the successor for its predecessor and adopt it as a closer successor when it
//!    lies between us.
//! 3. Notify the successor about us and take over its successor list.
//! 4. Ping the predecessor and forget it when it stopped answering.
//!
//! # Lookup
//!
//! A lookup enters the ring at the local vnode closest below the key, then walks successor
//! lists until the key falls between a vnode and its successor. Every forward counts as a
//! hop and a lookup gives up once its hop budget is spent.
//!
//! ```no_run
//! # async fn run() -> chord_core::error::Result<()> {
//! use std::sync::Arc;
//!
//! use chord_core::config::Config;
//! use chord_core::dht::Ring;
//! use chord_core::transport::LocalTransport;
//!
//! let ring = Ring::create(Config::new("127.0.0.1:8000"), Arc::new(LocalTransport::isolated())).await?;
//! let owners = ring.lookup(3, b"some key").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consts;
pub mod dht;
pub mod error;
pub mod logging;
pub mod stats;
pub mod transport;

#[cfg(test)]
mod tests;
