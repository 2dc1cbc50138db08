//! Pairing channel: transport between wearable and companion
//!
//! The link may become unreachable at any moment, so every send checks
//! reachability immediately before transmitting. Nothing is retried here;
//! retry cadence belongs to the caller.

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::types::ChannelError;

/// Bidirectional message transport
pub trait PairingChannel: Send + Sync {
    /// Whether the paired device can receive right now
    fn is_reachable(&self) -> bool;

    /// Send and suspend until the peer replies or the link drops
    fn send_with_reply(&self, message: Value) -> BoxFuture<'_, Result<Value, ChannelError>>;

    /// Send without waiting for a reply
    fn send(&self, message: Value) -> Result<(), ChannelError>;
}

/// Answers one send-with-reply message
#[derive(Debug)]
pub struct ReplyHandle {
    tx: oneshot::Sender<Value>,
}

impl ReplyHandle {
    /// Handle plus the receiver its reply arrives on
    pub fn channel() -> (Self, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Deliver the reply; false when the sender stopped waiting
    pub fn send(self, reply: Value) -> bool {
        self.tx.send(reply).is_ok()
    }
}

/// A message arriving at an endpoint
#[derive(Debug)]
pub struct Inbound {
    pub message: Value,
    pub reply: Option<ReplyHandle>,
}

// =============================================================================
// IN-PROCESS LINK
// =============================================================================

/// In-process pairing link with shared reachability
#[derive(Debug, Default)]
pub struct LocalLink;

impl LocalLink {
    /// Two connected endpoints, initially reachable
    pub fn pair() -> (LinkEndpoint, LinkEndpoint) {
        let (reachable, _) = watch::channel(true);
        let reachable = Arc::new(reachable);
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = LinkEndpoint {
            reachable: Arc::clone(&reachable),
            outbound: b_tx,
            inbound: Mutex::new(Some(a_rx)),
        };
        let b = LinkEndpoint {
            reachable,
            outbound: a_tx,
            inbound: Mutex::new(Some(b_rx)),
        };
        (a, b)
    }
}

/// One side of a [`LocalLink`]
#[derive(Debug)]
pub struct LinkEndpoint {
    reachable: Arc<watch::Sender<bool>>,
    outbound: mpsc::UnboundedSender<Inbound>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
}

impl LinkEndpoint {
    /// Change reachability for both sides of the link
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.send_replace(reachable);
        debug!(reachable, "pairing link reachability changed");
    }

    /// Observe reachability changes
    pub fn subscribe_reachability(&self) -> watch::Receiver<bool> {
        self.reachable.subscribe()
    }

    /// Messages addressed to this endpoint; available once
    pub fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Inbound>> {
        match self.inbound.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl PairingChannel for LinkEndpoint {
    fn is_reachable(&self) -> bool {
        *self.reachable.borrow()
    }

    fn send_with_reply(&self, message: Value) -> BoxFuture<'_, Result<Value, ChannelError>> {
        Box::pin(async move {
            if !self.is_reachable() {
                return Err(ChannelError::Unreachable);
            }

            let mut reachability = self.reachable.subscribe();
            let (reply, rx) = ReplyHandle::channel();
            self.outbound
                .send(Inbound {
                    message,
                    reply: Some(reply),
                })
                .map_err(|_| ChannelError::Closed)?;

            tokio::select! {
                reply = rx => reply.map_err(|_| ChannelError::NoReply),
                _ = reachability.wait_for(|reachable| !*reachable) => Err(ChannelError::Unreachable),
            }
        })
    }

    fn send(&self, message: Value) -> Result<(), ChannelError> {
        if !self.is_reachable() {
            return Err(ChannelError::Unreachable);
        }
        self.outbound
            .send(Inbound {
                message,
                reply: None,
            })
            .map_err(|_| ChannelError::Closed)
    }
}
