//! Broadcast shutdown signaling for pipeline tasks.
//!
//! Abstracts tokio's watch channels into a shutdown signal with multiple
//! receivers. All subscribed tasks observe the signal simultaneously, which
//! lets the pipeline stop its workers and timers together.

use tokio::sync::watch;

/// Receiver side of the shutdown signal.
///
/// Tasks await `changed()` to detect the signal. The await also completes when
/// the transmitter is dropped, so tasks never outlive the pipeline.
pub type ShutdownRx = watch::Receiver<()>;

/// Transmitter side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Broadcasts the shutdown signal to all subscribed receivers.
    ///
    /// Fails only when no receiver is subscribed anymore, which means every
    /// task has already terminated.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    /// Creates a new receiver subscribed to this signal.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Creates a new shutdown signal channel.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}
