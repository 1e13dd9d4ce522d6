//! Per-class FIFO with its admission policy, rate estimator and statistics.
//!
//! All mutable state of a queue sits behind one mutex, so the admission
//! decision and the push that follows it are a single critical section.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bandwidth::Bandwidth;
use bytesize::ByteSize;
use parking_lot::{Mutex, MutexGuard};
use rand::{rngs::StdRng, SeedableRng};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::core::DropReason;
use crate::error::QueueError;
use crate::qdisc::{DisciplineKind, TAIL_DROP};

pub mod rate;
pub mod red;

pub use rate::RateEstimator;
pub use red::{RedSnapshot, RedState, RedVerdict};

pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[cfg(feature = "serde")]
fn default_discipline() -> String {
    TAIL_DROP.to_string()
}

#[cfg(feature = "serde")]
fn default_weight() -> f64 {
    1.0
}

#[cfg(feature = "serde")]
fn default_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub name: String,
    #[cfg_attr(feature = "serde", serde(default = "default_discipline"))]
    pub discipline: String,
    #[cfg_attr(feature = "serde", serde(default = "default_weight"))]
    pub weight: f64,
    /// Extra pause the scheduler takes after serving this queue
    #[cfg_attr(
        feature = "serde",
        serde(default, with = "crate::utils::serde::duration")
    )]
    pub delay: Duration,
    #[cfg_attr(feature = "serde", serde(default = "default_capacity"))]
    pub capacity: usize,
}

impl QueueConfig {
    pub fn new<S: Into<String>, D: Into<String>>(
        name: S,
        discipline: D,
        weight: f64,
        delay: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            name: name.into(),
            discipline: discipline.into(),
            weight,
            delay,
            capacity,
        }
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.capacity == 0 {
            return Err(QueueError::InvalidCapacity(self.capacity));
        }
        validate_weight(self.weight)
    }
}

pub(crate) fn validate_weight(weight: f64) -> Result<(), QueueError> {
    if weight.is_finite() && weight > 0.0 {
        Ok(())
    } else {
        Err(QueueError::InvalidWeight(weight))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct QueueCounters {
    enqueued_packets: u64,
    enqueued_bytes: u64,
    dequeued_packets: u64,
    dequeued_bytes: u64,
    dropped_full: u64,
    dropped_early: u64,
    dropped_forced: u64,
    discarded: u64,
}

#[cfg_attr(feature = "serde", serde_with::skip_serializing_none)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStats {
    pub name: String,
    pub discipline: String,
    pub weight: f64,
    #[cfg_attr(feature = "serde", serde(with = "crate::utils::serde::duration"))]
    pub delay: Duration,
    pub capacity: usize,
    pub occupancy: usize,
    pub backlog: ByteSize,
    pub enqueued_packets: u64,
    pub enqueued_bytes: ByteSize,
    pub dequeued_packets: u64,
    pub dequeued_bytes: ByteSize,
    pub dropped_full: u64,
    pub dropped_early: u64,
    pub dropped_forced: u64,
    /// Packets thrown away when the queue was deleted or torn down
    pub discarded: u64,
    /// Arrival rate
    pub rate: Bandwidth,
    pub red: Option<RedSnapshot>,
}

impl QueueStats {
    pub fn dropped(&self) -> u64 {
        self.dropped_full + self.dropped_early + self.dropped_forced
    }
}

/// State guarded by the queue mutex.
#[derive(Debug)]
pub struct QueueState<P> {
    fifo: VecDeque<(P, usize)>,
    bytes: usize,
    capacity: usize,
    discipline: String,
    kind: DisciplineKind,
    weight: f64,
    delay: Duration,
    red: Option<RedState>,
    rng: StdRng,
    rate: RateEstimator,
    counters: QueueCounters,
}

impl<P> QueueState<P> {
    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn discipline(&self) -> &str {
        &self.discipline
    }

    pub fn kind(&self) -> DisciplineKind {
        self.kind
    }

    pub fn red(&self) -> Option<&RedState> {
        self.red.as_ref()
    }

    /// Byte length of the head packet.
    pub fn front_len(&self) -> Option<usize> {
        self.fifo.front().map(|(_, length)| *length)
    }

    /// Run the capacity check, then RED if adopted. Counts the drop on failure.
    pub fn check_admission(&mut self, now: Instant) -> Result<(), DropReason> {
        let occupancy = self.fifo.len();
        if occupancy >= self.capacity {
            self.counters.dropped_full += 1;
            return Err(DropReason::QueueFull);
        }
        let Some(red) = self.red.as_mut() else {
            return Ok(());
        };
        match red.decide(occupancy, now, &mut self.rng) {
            RedVerdict::Admit => Ok(()),
            RedVerdict::EarlyDrop => {
                self.counters.dropped_early += 1;
                Err(DropReason::RedEarly)
            }
            RedVerdict::ForcedDrop => {
                self.counters.dropped_forced += 1;
                Err(DropReason::RedForced)
            }
        }
    }

    /// Append an admitted packet, returning the occupancy before the push.
    pub fn push(&mut self, packet: P, length: usize, now: Instant) -> usize {
        let before = self.fifo.len();
        self.fifo.push_back((packet, length));
        self.bytes += length;
        self.counters.enqueued_packets += 1;
        self.counters.enqueued_bytes += length as u64;
        self.rate.record(length, now);
        before
    }

    pub fn pop(&mut self, now: Instant) -> Option<(P, usize)> {
        let (packet, length) = self.fifo.pop_front()?;
        self.bytes -= length;
        self.counters.dequeued_packets += 1;
        self.counters.dequeued_bytes += length as u64;
        if self.fifo.is_empty() {
            if let Some(red) = self.red.as_mut() {
                red.mark_idle(now);
            }
        }
        Some((packet, length))
    }

    /// Throw away every held packet, returning how many there were.
    pub fn discard(&mut self) -> usize {
        let count = self.fifo.len();
        self.fifo.clear();
        self.bytes = 0;
        self.counters.discarded += count as u64;
        count
    }

    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }

    /// Switch discipline. Existing RED state is kept when `red` is adopted
    /// again; moving from tail-drop to RED builds fresh state scaled by the
    /// queue capacity.
    pub fn adopt(&mut self, name: &str, kind: DisciplineKind, now: Instant) {
        match kind {
            DisciplineKind::TailDrop => self.red = None,
            DisciplineKind::Red(params) => {
                if self.red.is_none() {
                    self.red = Some(RedState::new(&params, self.capacity, now));
                }
            }
        }
        self.discipline = name.to_string();
        self.kind = kind;
    }

    fn stats(&self, name: &str, now: Instant) -> QueueStats {
        let counters = self.counters;
        QueueStats {
            name: name.to_string(),
            discipline: self.discipline.clone(),
            weight: self.weight,
            delay: self.delay,
            capacity: self.capacity,
            occupancy: self.fifo.len(),
            backlog: ByteSize::b(self.bytes as u64),
            enqueued_packets: counters.enqueued_packets,
            enqueued_bytes: ByteSize::b(counters.enqueued_bytes),
            dequeued_packets: counters.dequeued_packets,
            dequeued_bytes: ByteSize::b(counters.dequeued_bytes),
            dropped_full: counters.dropped_full,
            dropped_early: counters.dropped_early,
            dropped_forced: counters.dropped_forced,
            discarded: counters.discarded,
            rate: self.rate.current(now),
            red: self.red.as_ref().map(RedState::snapshot),
        }
    }
}

/// A named class queue shared between producers and the scheduler.
#[derive(Debug)]
pub struct ClassQueue<P> {
    name: Arc<str>,
    state: Mutex<QueueState<P>>,
}

impl<P> ClassQueue<P> {
    /// `kind` is the catalog entry for `config.discipline`, resolved by the
    /// caller. A `seed` makes RED decisions reproducible.
    pub fn new(
        config: &QueueConfig,
        kind: DisciplineKind,
        seed: Option<u64>,
        now: Instant,
    ) -> Result<Self, QueueError> {
        config.validate()?;
        debug!(
            name = %config.name,
            discipline = %config.discipline,
            weight = config.weight,
            delay = ?config.delay,
            capacity = config.capacity,
            "New ClassQueue"
        );
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let red = match kind {
            DisciplineKind::Red(params) => Some(RedState::new(&params, config.capacity, now)),
            DisciplineKind::TailDrop => None,
        };
        Ok(Self {
            name: config.name.as_str().into(),
            state: Mutex::new(QueueState {
                fifo: VecDeque::with_capacity(config.capacity.min(DEFAULT_QUEUE_CAPACITY)),
                bytes: 0,
                capacity: config.capacity,
                discipline: config.discipline.clone(),
                kind,
                weight: config.weight,
                delay: config.delay,
                red,
                rng,
                rate: RateEstimator::new(),
                counters: QueueCounters::default(),
            }),
        })
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn lock(&self) -> MutexGuard<'_, QueueState<P>> {
        self.state.lock()
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let stats = self.state.lock().stats(&self.name, Instant::now());
        trace!(name = %self.name, occupancy = stats.occupancy, "Queue stats");
        stats
    }
}
