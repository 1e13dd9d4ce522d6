//! Virtual-time weighted fair queueing.
//!
//! Each registered queue carries a start and a finish tag in virtual time. A
//! queue is busy while it holds packets; the virtual clock advances with
//! every arrival and departure by the served length divided by the total
//! weight of the busy queues, and never falls behind the smallest busy start
//! tag.

use std::sync::Arc;

use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct FlowTag {
    name: Arc<str>,
    weight: f64,
    start: f64,
    finish: f64,
    busy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TagSnapshot {
    pub start: f64,
    pub finish: f64,
    pub busy: bool,
}

#[derive(Debug, Default)]
pub struct VirtualClock {
    now: f64,
    // Registration order breaks ties between equal finish tags
    tags: Vec<FlowTag>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.tags.iter().position(|tag| &*tag.name == name)
    }

    pub fn tag(&self, name: &str) -> Option<TagSnapshot> {
        self.position(name).map(|index| {
            let tag = &self.tags[index];
            TagSnapshot {
                start: tag.start,
                finish: tag.finish,
                busy: tag.busy,
            }
        })
    }

    pub fn register(&mut self, name: Arc<str>, weight: f64) {
        match self.position(&name) {
            Some(index) => self.tags[index].weight = weight,
            None => {
                debug!(%name, weight, "Register flow in virtual clock");
                self.tags.push(FlowTag {
                    name,
                    weight,
                    start: 0.0,
                    finish: 0.0,
                    busy: false,
                });
            }
        }
    }

    pub fn unregister(&mut self, name: &str) {
        if let Some(index) = self.position(name) {
            self.tags.remove(index);
            debug!(name, "Remove flow from virtual clock");
        }
    }

    pub fn set_weight(&mut self, name: &str, weight: f64) {
        if let Some(index) = self.position(name) {
            self.tags[index].weight = weight;
        }
    }

    fn busy_weight(&self) -> f64 {
        self.tags.iter().filter(|t| t.busy).map(|t| t.weight).sum()
    }

    fn min_busy_start(&self) -> Option<f64> {
        self.tags
            .iter()
            .filter(|t| t.busy)
            .map(|t| t.start)
            .min_by(f64::total_cmp)
    }

    // Advance by `length` worth of service shared among the busy queues
    fn advance(&mut self, length: usize) {
        let total = self.busy_weight();
        if total <= 0.0 {
            return;
        }
        let stepped = self.now + length as f64 / total;
        self.now = match self.min_busy_start() {
            Some(start) => stepped.max(start),
            None => stepped,
        };
    }

    /// A packet of `length` bytes arrived at an empty queue.
    pub fn arrive(&mut self, name: &str, length: usize) {
        let Some(index) = self.position(name) else {
            return;
        };
        let now = self.now;
        let tag = &mut self.tags[index];
        tag.start = now.max(tag.finish);
        tag.finish = tag.start + length as f64 / tag.weight;
        tag.busy = true;
        trace!(name, start = tag.start, finish = tag.finish, "Flow became busy");
        self.advance(length);
    }

    /// Choose the next queue to serve.
    ///
    /// Among busy queues whose start tag is not ahead of the clock the one
    /// with the smallest finish tag wins. If every busy queue starts in the
    /// future, the clock jumps to the earliest start.
    pub fn pick(&mut self) -> Option<Arc<str>> {
        let now = self.now;
        let eligible = self
            .tags
            .iter()
            .filter(|t| t.busy && t.start <= now)
            .fold(None::<&FlowTag>, |best, tag| match best {
                Some(best) if best.finish <= tag.finish => Some(best),
                _ => Some(tag),
            });
        if let Some(tag) = eligible {
            return Some(tag.name.clone());
        }
        let earliest = self
            .tags
            .iter()
            .filter(|t| t.busy)
            .fold(None::<&FlowTag>, |best, tag| match best {
                Some(best) if best.start <= tag.start => Some(best),
                _ => Some(tag),
            })?;
        let name = earliest.name.clone();
        self.now = earliest.start;
        trace!(%name, now = self.now, "No eligible flow, advance virtual clock");
        Some(name)
    }

    /// A packet of `length` bytes left `name`; `next` is the length of the
    /// packet now at its head, if any.
    pub fn depart(&mut self, name: &str, length: usize, next: Option<usize>) {
        let Some(index) = self.position(name) else {
            return;
        };
        let tag = &mut self.tags[index];
        match next {
            Some(next) => {
                tag.start = tag.finish;
                tag.finish = tag.start + next as f64 / tag.weight;
            }
            None => tag.busy = false,
        }
        self.advance(length);
    }

    /// Mark `name` idle without touching its tags, e.g. after its packets
    /// were discarded.
    pub fn idle(&mut self, name: &str) {
        if let Some(index) = self.position(name) {
            self.tags[index].busy = false;
        }
    }
}
