//! Channels leaving the core: the work queue feeding downstream protocol
//! workers and the side channel used by alternate forwarding.
//!
//! Both are unbounded tokio channels, so workers may drain them from plain
//! threads (`blocking_recv`) or from async tasks (`recv`).

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::Error;

/// A packet released by the scheduler.
#[derive(Debug)]
pub struct WorkItem<P> {
    pub packet: P,
    pub length: usize,
    /// Queue the packet was served from
    pub queue: Arc<str>,
}

/// A packet that bypassed classification.
#[derive(Debug)]
pub struct SideItem<P> {
    pub packet: P,
    pub length: usize,
}

#[derive(Debug)]
pub struct ChannelSender<T> {
    name: &'static str,
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for ChannelSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<T> ChannelSender<T> {
    pub fn send(&self, item: T) -> Result<(), Error> {
        self.tx
            .send(item)
            .map_err(|_| Error::ChannelError(format!("{} is closed.", self.name)))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct ChannelReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> ChannelReceiver<T> {
    /// Block the current thread until an item arrives. Returns `None` once
    /// every sender is gone. Must not be called from within an async runtime.
    pub fn blocking_recv(&mut self) -> Option<T> {
        self.rx.blocking_recv()
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Stop accepting items; those already sent can still be received.
    pub fn close(&mut self) {
        self.rx.close()
    }
}

pub type WorkQueueSender<P> = ChannelSender<WorkItem<P>>;
pub type WorkQueueReceiver<P> = ChannelReceiver<WorkItem<P>>;
pub type SideChannelSender<P> = ChannelSender<SideItem<P>>;
pub type SideChannelReceiver<P> = ChannelReceiver<SideItem<P>>;

fn channel<T>(name: &'static str) -> (ChannelSender<T>, ChannelReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSender { name, tx }, ChannelReceiver { rx })
}

pub fn work_queue<P>() -> (WorkQueueSender<P>, WorkQueueReceiver<P>) {
    channel("Work queue")
}

pub fn side_channel<P>() -> (SideChannelSender<P>, SideChannelReceiver<P>) {
    channel("Side channel")
}
