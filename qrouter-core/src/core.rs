//! The packet core: queue map, shared packet counter, virtual clock and the
//! admission path.
//!
//! Lock order, outermost first: class table, filter list, discipline catalog,
//! queue map, a single queue, packet counter, virtual clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::channel::{SideChannelSender, SideItem, WorkItem, WorkQueueSender};
use crate::classify::{ClassTable, FilterList};
use crate::error::{Error, QueueError};
use crate::packet::{Packet, PacketMeta};
use crate::qdisc::{DisciplineCatalog, TAIL_DROP};
use crate::queue::{
    validate_weight, ClassQueue, QueueConfig, QueueStats, DEFAULT_QUEUE, DEFAULT_QUEUE_CAPACITY,
};
use crate::scheduler::wfq::VirtualClock;

#[cfg_attr(
    feature = "serde",
    derive(Deserialize, Serialize),
    serde(rename_all = "snake_case")
)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchedPolicy {
    #[default]
    RoundRobin,
    WeightedFair,
}

#[cfg_attr(
    feature = "serde",
    derive(Deserialize, Serialize),
    serde(rename_all = "snake_case")
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Denied by the filter list
    Filtered,
    /// The destination queue does not exist
    NoQueue,
    QueueFull,
    RedEarly,
    RedForced,
    /// The side channel has no receiver
    ChannelClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Enqueued { queue: Arc<str> },
    Bypassed,
    Dropped(DropReason),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Admission::Dropped(_))
    }
}

/// The configuration tables shared by the core and the control interface.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub classes: Arc<RwLock<ClassTable>>,
    pub filters: Arc<RwLock<FilterList>>,
    pub disciplines: Arc<RwLock<DisciplineCatalog>>,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Number of packets held across all queues, with a wake-up signal for the
/// scheduler.
#[derive(Debug, Default)]
pub struct PacketCounter {
    count: Mutex<usize>,
    ready: Condvar,
}

impl PacketCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        *self.count.lock()
    }

    pub fn increment(&self) {
        let mut count = self.count.lock();
        *count += 1;
        if *count == 1 {
            self.ready.notify_one();
        }
    }

    pub fn decrement(&self, n: usize) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(n);
    }

    /// Wait up to `timeout` for the counter to become positive. Returns
    /// whether packets are pending.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        self.ready
            .wait_while_for(&mut count, |count| *count == 0, timeout);
        *count > 0
    }
}

#[cfg(feature = "serde")]
fn default_core_name() -> String {
    "qrouter".to_string()
}

#[cfg(feature = "serde")]
fn default_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

#[cfg(feature = "serde")]
fn default_discipline() -> String {
    TAIL_DROP.to_string()
}

#[cfg_attr(feature = "serde", serde_with::skip_serializing_none)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    #[cfg_attr(feature = "serde", serde(default = "default_core_name"))]
    pub name: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub policy: SchedPolicy,
    /// Capacity of the `default` queue
    #[cfg_attr(feature = "serde", serde(default = "default_capacity"))]
    pub default_capacity: usize,
    /// Discipline of the `default` queue
    #[cfg_attr(feature = "serde", serde(default = "default_discipline"))]
    pub default_discipline: String,
    /// Seed for RED decisions; random if absent
    #[cfg_attr(feature = "serde", serde(default))]
    pub red_seed: Option<u64>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            name: "qrouter".to_string(),
            policy: SchedPolicy::default(),
            default_capacity: DEFAULT_QUEUE_CAPACITY,
            default_discipline: TAIL_DROP.to_string(),
            red_seed: None,
        }
    }
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStats {
    pub name: String,
    pub policy: SchedPolicy,
    pub pending: usize,
    pub enqueued: u64,
    pub bypassed: u64,
    pub filtered: u64,
    pub no_queue: u64,
    /// Capacity and RED drops across all queues
    pub dropped: u64,
    pub dispatched: u64,
}

#[derive(Debug, Default)]
struct CoreCounters {
    enqueued: AtomicU64,
    bypassed: AtomicU64,
    filtered: AtomicU64,
    no_queue: AtomicU64,
    dropped: AtomicU64,
    dispatched: AtomicU64,
}

/// A packet taken off a queue, with the pause its queue asks for.
#[derive(Debug)]
pub struct Dequeued<P> {
    pub item: WorkItem<P>,
    pub delay: Duration,
}

struct QueueMap<P> {
    queues: HashMap<Arc<str>, Arc<ClassQueue<P>>>,
    // Registration order, the order classification and round-robin scan in
    order: Vec<Arc<str>>,
}

impl<P> QueueMap<P> {
    fn get(&self, name: &str) -> Option<&Arc<ClassQueue<P>>> {
        self.queues.get(name)
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<ClassQueue<P>>> {
        self.order.iter().filter_map(move |name| self.queues.get(name))
    }
}

pub struct PacketCore<P: Packet> {
    name: String,
    policy: SchedPolicy,
    red_seed: Option<u64>,
    tables: Tables,
    queues: RwLock<QueueMap<P>>,
    counter: PacketCounter,
    clock: Mutex<VirtualClock>,
    work_tx: WorkQueueSender<P>,
    side_tx: SideChannelSender<P>,
    alternate: AtomicBool,
    counters: CoreCounters,
}

impl<P: Packet> std::fmt::Debug for PacketCore<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketCore")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("pending", &self.counter.get())
            .finish()
    }
}

impl<P: Packet> PacketCore<P> {
    /// Build a core holding only the `default` queue.
    pub fn new(
        config: CoreConfig,
        tables: Tables,
        work_tx: WorkQueueSender<P>,
        side_tx: SideChannelSender<P>,
    ) -> Result<Self, Error> {
        debug!(?config, "New PacketCore");
        let core = Self {
            name: config.name,
            policy: config.policy,
            red_seed: config.red_seed,
            tables,
            queues: RwLock::new(QueueMap {
                queues: HashMap::new(),
                order: Vec::new(),
            }),
            counter: PacketCounter::new(),
            clock: Mutex::new(VirtualClock::new()),
            work_tx,
            side_tx,
            alternate: AtomicBool::new(false),
            counters: CoreCounters::default(),
        };
        core.create_queue(QueueConfig::new(
            DEFAULT_QUEUE,
            config.default_discipline,
            1.0,
            Duration::ZERO,
            config.default_capacity,
        ))?;
        Ok(core)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> SchedPolicy {
        self.policy
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    pub fn set_alternate_mode(&self, enabled: bool) {
        info!(enabled, "Set alternate forwarding mode");
        self.alternate.store(enabled, Ordering::Release);
    }

    pub fn alternate_mode(&self) -> bool {
        self.alternate.load(Ordering::Acquire)
    }

    /// Packets currently held across all queues.
    pub fn pending(&self) -> usize {
        self.counter.get()
    }

    pub fn wait_for_packets(&self, timeout: Duration) -> bool {
        self.counter.wait(timeout)
    }

    fn select_queue<'a>(
        queues: &'a QueueMap<P>,
        classes: &ClassTable,
        meta: Option<&PacketMeta>,
    ) -> &'a str {
        queues
            .order
            .iter()
            .filter(|name| &***name != DEFAULT_QUEUE)
            .find(|name| classes.matches(name, meta))
            .map(|name| &**name)
            .unwrap_or(DEFAULT_QUEUE)
    }

    /// Name of the queue a packet with `meta` would be placed in: the first
    /// queue, in registration order, whose same-named class matches.
    pub fn classify(&self, meta: Option<&PacketMeta>) -> Arc<str> {
        let classes = self.tables.classes.read();
        let queues = self.queues.read();
        Arc::from(Self::select_queue(&queues, &classes, meta))
    }

    pub fn admit(&self, packet: P, alternate: bool) -> Admission {
        let length = packet.length();
        if alternate && self.alternate_mode() {
            return match self.side_tx.send(SideItem { packet, length }) {
                Ok(()) => {
                    self.counters.bypassed.fetch_add(1, Ordering::Relaxed);
                    trace!(length, "Packet bypassed to the side channel");
                    Admission::Bypassed
                }
                Err(e) => {
                    warn!("{}", e);
                    Admission::Dropped(DropReason::ChannelClosed)
                }
            };
        }

        let meta = packet.meta();
        let classes = self.tables.classes.read();
        if self
            .tables
            .filters
            .read()
            .evaluate(&classes, meta.as_ref())
        {
            self.counters.filtered.fetch_add(1, Ordering::Relaxed);
            trace!(header = %packet.desc(), "Packet filtered");
            return Admission::Dropped(DropReason::Filtered);
        }

        let queues = self.queues.read();
        let name = Self::select_queue(&queues, &classes, meta.as_ref());
        drop(classes);
        let Some(queue) = queues.get(name) else {
            error!(queue = name, "Classified to a queue that does not exist");
            self.counters.no_queue.fetch_add(1, Ordering::Relaxed);
            return Admission::Dropped(DropReason::NoQueue);
        };

        let now = Instant::now();
        let mut state = queue.lock();
        if let Err(reason) = state.check_admission(now) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(queue = name, occupancy = state.len(), ?reason, "Packet dropped");
            return Admission::Dropped(reason);
        }
        let before = state.push(packet, length, now);
        self.counter.increment();
        if self.policy == SchedPolicy::WeightedFair && before == 0 {
            self.clock.lock().arrive(name, length);
        }
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        trace!(queue = name, length, occupancy = before + 1, "Packet enqueued");
        Admission::Enqueued {
            queue: queue.name().clone(),
        }
    }

    /// Take the head packet of `name`, if any.
    pub fn try_dequeue(&self, name: &str) -> Option<Dequeued<P>> {
        let queues = self.queues.read();
        let queue = queues.get(name)?;
        let mut state = queue.lock();
        let Some((packet, length)) = state.pop(Instant::now()) else {
            if self.policy == SchedPolicy::WeightedFair {
                self.clock.lock().idle(name);
            }
            return None;
        };
        self.counter.decrement(1);
        if self.policy == SchedPolicy::WeightedFair {
            self.clock.lock().depart(name, length, state.front_len());
        }
        Some(Dequeued {
            item: WorkItem {
                packet,
                length,
                queue: queue.name().clone(),
            },
            delay: state.delay(),
        })
    }

    /// Take the packet the virtual clock selects next.
    pub fn dequeue_fair(&self) -> Option<Dequeued<P>> {
        // A selected queue may have been drained by a concurrent delete
        for _ in 0..=self.queue_count() {
            let name = self.clock.lock().pick()?;
            if let Some(dequeued) = self.try_dequeue(&name) {
                return Some(dequeued);
            }
        }
        None
    }

    /// Hand a packet to the downstream workers.
    pub fn dispatch(&self, item: WorkItem<P>) -> Result<(), Error> {
        self.work_tx.send(item)?;
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn create_queue(&self, config: QueueConfig) -> Result<(), Error> {
        config.validate()?;
        let kind = self.tables.disciplines.read().resolve(&config.discipline)?;
        let mut queues = self.queues.write();
        if queues.queues.contains_key(config.name.as_str()) {
            return Err(QueueError::DuplicateQueue(config.name).into());
        }
        let seed = self
            .red_seed
            .map(|seed| seed.wrapping_add(queues.order.len() as u64));
        let queue = Arc::new(ClassQueue::new(&config, kind, seed, Instant::now())?);
        let name = queue.name().clone();
        self.clock.lock().register(name.clone(), config.weight);
        queues.order.push(name.clone());
        queues.queues.insert(name, queue);
        info!(name = %config.name, discipline = %config.discipline, "Queue created");
        Ok(())
    }

    /// Remove a queue, discarding the packets it still holds.
    pub fn delete_queue(&self, name: &str) -> Result<QueueStats, Error> {
        if name == DEFAULT_QUEUE {
            return Err(QueueError::ReservedQueue(name.to_string()).into());
        }
        let mut queues = self.queues.write();
        let Some(queue) = queues.queues.remove(name) else {
            return Err(QueueError::QueueNotFound(name.to_string()).into());
        };
        queues.order.retain(|n| &**n != name);
        let discarded = queue.lock().discard();
        self.counter.decrement(discarded);
        self.clock.lock().unregister(name);
        info!(name, discarded, "Queue deleted");
        Ok(queue.stats())
    }

    fn with_queue<R, F>(&self, name: &str, f: F) -> Result<R, Error>
    where
        F: FnOnce(&ClassQueue<P>) -> R,
    {
        let queues = self.queues.read();
        queues
            .get(name)
            .map(|queue| f(queue.as_ref()))
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()).into())
    }

    pub fn set_weight(&self, name: &str, weight: f64) -> Result<(), Error> {
        validate_weight(weight)?;
        self.with_queue(name, |queue| {
            let mut state = queue.lock();
            state.set_weight(weight);
            self.clock.lock().set_weight(name, weight);
        })?;
        debug!(name, weight, "Set queue weight");
        Ok(())
    }

    pub fn set_discipline(&self, name: &str, discipline: &str) -> Result<(), Error> {
        let kind = self.tables.disciplines.read().resolve(discipline)?;
        self.with_queue(name, |queue| {
            queue.lock().adopt(discipline, kind, Instant::now());
        })?;
        debug!(name, discipline, "Set queue discipline");
        Ok(())
    }

    pub fn describe_queue(&self, name: &str) -> Result<QueueStats, Error> {
        self.with_queue(name, ClassQueue::stats)
    }

    /// Statistics of every queue in registration order.
    pub fn list_queues(&self) -> Vec<QueueStats> {
        self.queues.read().iter().map(|queue| queue.stats()).collect()
    }

    pub fn queue_names(&self) -> Vec<Arc<str>> {
        self.queues.read().order.clone()
    }

    pub fn queue_count(&self) -> usize {
        self.queues.read().order.len()
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.queues.read().queues.contains_key(name)
    }

    /// Drop every held packet, returning how many were discarded.
    pub fn discard_all(&self) -> usize {
        let queues = self.queues.read();
        let mut total = 0;
        for queue in queues.iter() {
            let mut state = queue.lock();
            let discarded = state.discard();
            self.counter.decrement(discarded);
            self.clock.lock().idle(queue.name());
            drop(state);
            total += discarded;
        }
        if total > 0 {
            info!(discarded = total, "Discarded queued packets");
        }
        total
    }

    pub fn stats(&self) -> CoreStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CoreStats {
            name: self.name.clone(),
            policy: self.policy,
            pending: self.pending(),
            enqueued: load(&self.counters.enqueued),
            bypassed: load(&self.counters.bypassed),
            filtered: load(&self.counters.filtered),
            no_queue: load(&self.counters.no_queue),
            dropped: load(&self.counters.dropped),
            dispatched: load(&self.counters.dispatched),
        }
    }
}
