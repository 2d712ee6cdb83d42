use crate::error::{AvrError, Result};
use crate::types::{Label, StatusValue};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// A status label changed value
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub label: Label,
    pub value: StatusValue,
}

/// Callback registered with [`crate::Avr::notify_with`]
pub type Listener = Arc<dyn Fn(&str, &StatusValue) + Send + Sync>;

/// Fans status changes out to the registered callback and to every receiver
///
/// The sender is dropped when the session ends, which is what tells
/// receivers the stream is gone.
pub(crate) struct Notifier {
    tx: Mutex<Option<broadcast::Sender<StatusUpdate>>>,
    listener: Mutex<Option<Listener>>,
}

impl Notifier {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx: Mutex::new(Some(tx)),
            listener: Mutex::new(None),
        }
    }

    fn sender(&self) -> Option<broadcast::Sender<StatusUpdate>> {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Subscribing after close yields a receiver that is already closed
    pub(crate) fn subscribe(&self) -> StatusReceiver {
        let rx = match self.sender() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        };
        StatusReceiver::new(rx)
    }

    /// Release the sender so every receiver sees `ConnectionClosed`
    pub(crate) fn close(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub(crate) fn set_listener(&self, listener: Listener) {
        *self.listener.lock().unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    /// Deliver one change. The callback runs before this returns.
    pub(crate) fn emit(&self, update: StatusUpdate) {
        tracing::debug!("{} -> {}", update.label, update.value);
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(listener) = listener {
            listener(update.label, &update.value);
        }
        // No receivers is fine
        if let Some(tx) = self.sender() {
            let _ = tx.send(update);
        }
    }
}

/// Receiver for status updates
pub struct StatusReceiver {
    rx: broadcast::Receiver<StatusUpdate>,
}

impl StatusReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<StatusUpdate>) -> Self {
        Self { rx }
    }

    /// Receive the next status update
    ///
    /// Fails with `ConnectionClosed` once the session has ended, after any
    /// updates still buffered have been received.
    pub async fn recv(&mut self) -> Result<StatusUpdate> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => AvrError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                AvrError::ChannelError(format!("Lagged by {} messages", n))
            }
        })
    }

    /// Try to receive a status update without blocking
    ///
    /// Returns `None` if no update is available.
    pub fn try_recv(&mut self) -> Result<Option<StatusUpdate>> {
        match self.rx.try_recv() {
            Ok(update) => Ok(Some(update)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(AvrError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(AvrError::ChannelError(format!("Lagged by {} messages", n)))
            }
        }
    }
}
