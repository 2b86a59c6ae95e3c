//! Application callbacks about ownership changes.
#![warn(missing_docs)]
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::vnode::Vnode;

/// Delegate is notified when the part of the ring a local vnode owns changes.
///
/// A vnode owns the keys in `(predecessor, vnode]`, so a new predecessor or a leaving
/// neighbour moves keys between vnodes. Applications storing data on the ring use these
/// hooks to hand data over. Every method defaults to doing nothing.
///
/// Callbacks run one at a time, in order, on a task owned by the ring. They never run on
/// the task serving an RPC, so a slow delegate does not stall the protocol.
pub trait Delegate: Send + Sync {
    /// `local` adopted `new` as its predecessor, replacing `previous`.
    fn new_predecessor(&self, _local: &Vnode, _new: &Vnode, _previous: Option<&Vnode>) {}

    /// `local` is leaving the ring.
    fn leaving(&self, _local: &Vnode, _predecessor: Option<&Vnode>, _successor: &Vnode) {}

    /// The predecessor `remote` of `local` left the ring.
    fn predecessor_leaving(&self, _local: &Vnode, _remote: &Vnode) {}

    /// The successor `remote` of `local` left the ring.
    fn successor_leaving(&self, _local: &Vnode, _remote: &Vnode) {}

    /// The ring shut down.
    fn shutdown(&self) {}
}

/// A callback waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegateEvent {
    /// See [Delegate::new_predecessor].
    NewPredecessor {
        /// local vnode
        local: Vnode,
        /// adopted predecessor
        new: Vnode,
        /// replaced predecessor
        previous: Option<Vnode>,
    },
    /// See [Delegate::leaving].
    Leaving {
        /// local vnode
        local: Vnode,
        /// its predecessor
        predecessor: Option<Vnode>,
        /// its successor
        successor: Vnode,
    },
    /// See [Delegate::predecessor_leaving].
    PredecessorLeaving {
        /// local vnode
        local: Vnode,
        /// leaving predecessor
        remote: Vnode,
    },
    /// See [Delegate::successor_leaving].
    SuccessorLeaving {
        /// local vnode
        local: Vnode,
        /// leaving successor
        remote: Vnode,
    },
    /// See [Delegate::shutdown]. Last event delivered.
    Shutdown,
}

/// Sending half handed to every local vnode.
#[derive(Debug, Clone, Default)]
pub struct DelegateSender(Option<mpsc::UnboundedSender<DelegateEvent>>);

impl DelegateSender {
    /// Queue an event. Dropped silently when no delegate is configured or it has shut down.
    pub fn send(&self, event: DelegateEvent) {
        if let Some(tx) = &self.0 {
            if tx.send(event).is_err() {
                tracing::debug!("[delegate] dispatcher gone, event dropped");
            }
        }
    }
}

/// Delivers [DelegateEvent]s to a [Delegate] on a dedicated task.
pub struct DelegateDispatcher {
    sender: DelegateSender,
    handle: Option<JoinHandle<()>>,
}

impl DelegateDispatcher {
    /// Spawn the delivery task. Without a delegate no task is spawned.
    pub fn spawn(delegate: Option<Arc<dyn Delegate>>) -> Self {
        let Some(delegate) = delegate else {
            return Self {
                sender: DelegateSender::default(),
                handle: None,
            };
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let stop = event == DelegateEvent::Shutdown;
                dispatch(delegate.as_ref(), event);
                if stop {
                    break;
                }
            }
        });
        Self {
            sender: DelegateSender(Some(tx)),
            handle: Some(handle),
        }
    }

    /// A sender for vnodes.
    pub fn sender(&self) -> DelegateSender {
        self.sender.clone()
    }

    /// Deliver [Delegate::shutdown] after every queued event and wait for the task.
    pub async fn shutdown(&mut self) {
        self.sender.send(DelegateEvent::Shutdown);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("[delegate] dispatcher task failed {:?}", e);
            }
        }
    }
}

fn dispatch(delegate: &dyn Delegate, event: DelegateEvent) {
    match event {
        DelegateEvent::NewPredecessor {
            local,
            new,
            previous,
        } => delegate.new_predecessor(&local, &new, previous.as_ref()),
        DelegateEvent::Leaving {
            local,
            predecessor,
            successor,
        } => delegate.leaving(&local, predecessor.as_ref(), &successor),
        DelegateEvent::PredecessorLeaving { local, remote } => {
            delegate.predecessor_leaving(&local, &remote)
        }
        DelegateEvent::SuccessorLeaving { local, remote } => {
            delegate.successor_leaving(&local, &remote)
        }
        DelegateEvent::Shutdown => delegate.shutdown(),
    }
}
