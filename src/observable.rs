//! Push-based value container.
//!
//! Every write is delivered, in order, to every subscriber alive at the time
//! of the write. A new subscriber first receives the current value. Channels
//! are unbounded so a slow observer never causes a write to be skipped.
//!
//! `Observable` itself is not synchronized; owners wrap it in the lock that
//! protects the rest of their state so that check-then-write sequences stay
//! atomic.

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

#[derive(Debug)]
pub struct Observable<T: Clone> {
    value: T,
    subscribers: Vec<mpsc::UnboundedSender<T>>,
}

impl<T: Clone> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            subscribers: Vec::new(),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
        self.publish();
    }

    pub fn update<F: FnOnce(&mut T)>(&mut self, mutator: F) {
        mutator(&mut self.value);
        self.publish();
    }

    /// Like [`update`](Self::update), but only publishes when the mutator
    /// reports a change.
    pub fn update_if<F: FnOnce(&mut T) -> bool>(&mut self, mutator: F) -> bool {
        let changed = mutator(&mut self.value);
        if changed {
            self.publish();
        }
        changed
    }

    pub fn subscribe(&mut self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Fresh channel with a live receiver, cannot fail
        let _ = tx.send(self.value.clone());
        self.subscribers.push(tx);
        Subscription { rx }
    }

    fn publish(&mut self) {
        let value = &self.value;
        // Dropped subscriptions are pruned lazily here
        self.subscribers.retain(|tx| tx.send(value.clone()).is_ok());
    }
}

impl<T: Clone + Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Receiving end of an [`Observable`].
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Next value, or `None` once the observable is gone and the backlog is empty.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Everything delivered so far, without waiting.
    pub fn drain(&mut self) -> Vec<T> {
        let mut values = Vec::new();
        while let Ok(value) = self.rx.try_recv() {
            values.push(value);
        }
        values
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
