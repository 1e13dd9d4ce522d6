//! The scheduler thread: sleeps while no packets are held, otherwise takes one
//! packet per cycle from the core and forwards it to the work queue.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, span, trace, Level};

use crate::core::{Dequeued, PacketCore, SchedPolicy};
use crate::error::Error;
use crate::packet::Packet;

pub mod round_robin;
pub mod wfq;

pub use round_robin::RoundRobin;
pub use wfq::VirtualClock;

/// Picks which queue gives up its head packet next.
pub trait ServicePolicy<P: Packet>: Send {
    fn next(&mut self, core: &PacketCore<P>) -> Option<Dequeued<P>>;
}

/// Service order driven by the core's virtual clock.
#[derive(Debug, Default)]
pub struct WeightedFair;

impl<P: Packet> ServicePolicy<P> for WeightedFair {
    fn next(&mut self, core: &PacketCore<P>) -> Option<Dequeued<P>> {
        core.dequeue_fair()
    }
}

#[cfg(feature = "serde")]
fn default_idle_wait() -> Duration {
    Duration::from_millis(10)
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Pause after each dispatched packet
    #[cfg_attr(
        feature = "serde",
        serde(default, with = "crate::utils::serde::duration")
    )]
    pub cycle: Duration,
    /// Upper bound of one idle wait, i.e. how quickly cancellation is noticed
    #[cfg_attr(
        feature = "serde",
        serde(default = "default_idle_wait", with = "crate::utils::serde::duration")
    )]
    pub idle_wait: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle: Duration::ZERO,
            idle_wait: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the packet counter to become positive
    Idle,
    Scanning,
    Dispatching,
}

pub struct Scheduler<P: Packet> {
    core: Arc<PacketCore<P>>,
    policy: Box<dyn ServicePolicy<P>>,
    config: SchedulerConfig,
    state: SchedulerState,
}

impl<P: Packet> Scheduler<P> {
    /// Build a scheduler serving `core` with the policy the core was built for.
    pub fn new(core: Arc<PacketCore<P>>, config: SchedulerConfig) -> Self {
        let policy: Box<dyn ServicePolicy<P>> = match core.policy() {
            SchedPolicy::RoundRobin => Box::new(RoundRobin::new()),
            SchedPolicy::WeightedFair => Box::new(WeightedFair),
        };
        debug!(core = core.name(), policy = ?core.policy(), ?config, "New Scheduler");
        Self {
            core,
            policy,
            config,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Serve at most one packet. Returns the pause owed after a dispatch, or
    /// `None` if every queue was empty.
    ///
    /// After a dispatch the state stays `Dispatching` until the pause is over
    /// or the next call starts.
    pub fn run_once(&mut self) -> Result<Option<Duration>, Error> {
        self.state = SchedulerState::Scanning;
        let Some(Dequeued { item, delay }) = self.policy.next(&self.core) else {
            self.state = SchedulerState::Idle;
            return Ok(None);
        };
        self.state = SchedulerState::Dispatching;
        trace!(queue = %item.queue, length = item.length, "Dispatch packet");
        if let Err(e) = self.core.dispatch(item) {
            self.state = SchedulerState::Idle;
            return Err(e);
        }
        Ok(Some(self.config.cycle + delay))
    }

    #[instrument(name = "Scheduler", level = "error", skip_all)]
    pub fn run(mut self, cancel_token: CancellationToken) -> Result<(), Error> {
        info!("Scheduler started");
        while !cancel_token.is_cancelled() {
            if !self.core.wait_for_packets(self.config.idle_wait) {
                continue;
            }
            match self.run_once() {
                Ok(Some(pause)) => {
                    if !pause.is_zero() {
                        thread::sleep(pause);
                    }
                    self.state = SchedulerState::Idle;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Scheduler stopped: {}", e);
                    return Err(e);
                }
            }
        }
        info!("Scheduler cancelled");
        Ok(())
    }

    /// Run on a dedicated thread until `cancel_token` is cancelled.
    pub fn spawn(
        self,
        cancel_token: CancellationToken,
    ) -> Result<thread::JoinHandle<Result<(), Error>>, Error> {
        let span = span!(Level::ERROR, "scheduler_thread").or_current();
        let handle = thread::Builder::new()
            .name(format!("{}-scheduler", self.core.name()))
            .spawn(move || {
                let _entered = span.entered();
                self.run(cancel_token)
            })?;
        Ok(handle)
    }
}
