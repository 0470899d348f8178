//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes membership change events to two kinds of consumers:
//!
//! - **Listeners** are invoked synchronously inside [`EventBus::publish`]. A
//!   publisher that returns `Ok` has already run every attached listener, which
//!   is what lets the decision cache drop stale entries before a mutation
//!   reports success.
//! - **Subscriptions** receive a copy of every message over a channel and drain
//!   it at their own pace (audit trails, metrics, replication).
//!
//! Listeners must be quick and must not publish on the same bus.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event stream.
///
/// Each subscription gets a copy of all events published after it was
/// created (broadcast semantics).
///
/// ```ignore
/// let subscription = bus.subscribe();
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(event) => record(event),
///         Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
///         Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
///
/// Subscriptions are designed for single-threaded consumption.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Synchronous consumer of published messages.
pub trait EventListener<M>: Send + Sync {
    fn on_event(&self, message: &M);
}

impl<M, L> EventListener<M> for Arc<L>
where
    L: EventListener<M> + ?Sized,
{
    fn on_event(&self, message: &M) {
        (**self).on_event(message)
    }
}

/// Transport-agnostic pub/sub bus.
///
/// Delivery to listeners is synchronous and happens before `publish` returns.
/// Delivery to subscriptions is best-effort: a subscriber that dropped its
/// receiver is silently removed.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;

    fn attach(&self, listener: Arc<dyn EventListener<M>>);
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }

    fn attach(&self, listener: Arc<dyn EventListener<M>>) {
        (**self).attach(listener)
    }
}
