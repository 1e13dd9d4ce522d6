//! A router instance: owns the shared tables, the packet core, the control
//! interface and the scheduler thread.

use std::sync::Arc;
use std::thread;

use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(feature = "serde")]
use crate::config::QosConfig;
use crate::{
    channel::{side_channel, work_queue, SideChannelReceiver, WorkQueueReceiver},
    control::QosControlInterface,
    core::{CoreConfig, PacketCore, Tables},
    error::Error,
    packet::Packet,
    scheduler::{Scheduler, SchedulerConfig},
};

pub static INSTANCE_ID: OnceCell<String> = OnceCell::new();

pub struct QosRadix<P: Packet> {
    core: Arc<PacketCore<P>>,
    control: QosControlInterface<P>,
    scheduler_config: SchedulerConfig,
    cancel_token: CancellationToken,
    // Use option to allow take ownership in drop
    scheduler_handle: Option<thread::JoinHandle<Result<(), Error>>>,
    work_rx: Option<WorkQueueReceiver<P>>,
    side_rx: Option<SideChannelReceiver<P>>,
}

impl<P: Packet> QosRadix<P> {
    pub fn new(
        core_config: CoreConfig,
        scheduler_config: SchedulerConfig,
        tables: Tables,
    ) -> Result<Self, Error> {
        let instance_id = INSTANCE_ID.get_or_init(|| {
            std::env::var("QROUTER_INSTANCE_ID")
                .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string())
        });
        info!("New QosRadix with instance id: {}", instance_id);

        let (work_tx, work_rx) = work_queue();
        let (side_tx, side_rx) = side_channel();
        let core = Arc::new(PacketCore::new(core_config, tables, work_tx, side_tx)?);
        let control = QosControlInterface::new(core.clone());
        Ok(Self {
            core,
            control,
            scheduler_config,
            cancel_token: CancellationToken::new(),
            scheduler_handle: None,
            work_rx: Some(work_rx),
            side_rx: Some(side_rx),
        })
    }

    /// Build the tables, the core and every configured queue.
    #[cfg(feature = "serde")]
    pub fn from_config(config: QosConfig) -> Result<Self, Error> {
        let tables = config.build_tables()?;
        let radix = Self::new(config.core.clone(), config.scheduler.clone(), tables)?;
        config.apply(&radix.control)?;
        Ok(radix)
    }

    pub fn instance_id(&self) -> &str {
        INSTANCE_ID.get().map(String::as_str).unwrap_or_default()
    }

    pub fn core(&self) -> &Arc<PacketCore<P>> {
        &self.core
    }

    pub fn control(&self) -> &QosControlInterface<P> {
        &self.control
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn spawn_scheduler(&mut self) -> Result<(), Error> {
        if self.scheduler_handle.is_some() {
            return Err(Error::SchedulerError(
                "Scheduler is already running".to_string(),
            ));
        }
        let scheduler = Scheduler::new(self.core.clone(), self.scheduler_config.clone());
        let handle = scheduler.spawn(self.cancel_token.child_token())?;
        self.scheduler_handle = Some(handle);
        debug!(core = self.core.name(), "Scheduler spawned");
        Ok(())
    }

    /// Receiver of scheduled packets. Can be taken once.
    pub fn take_work_receiver(&mut self) -> Option<WorkQueueReceiver<P>> {
        self.work_rx.take()
    }

    /// Receiver of alternately forwarded packets. Can be taken once.
    pub fn take_side_receiver(&mut self) -> Option<SideChannelReceiver<P>> {
        self.side_rx.take()
    }

    fn join_scheduler(&mut self) -> Result<(), Error> {
        let Some(handle) = self.scheduler_handle.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(Error::SchedulerError(
                "Scheduler thread panicked".to_string(),
            )),
        }
    }

    /// Stop the scheduler and drop every packet still queued.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        self.cancel_token.cancel();
        let result = self.join_scheduler();
        let discarded = self.core.discard_all();
        info!(discarded, "QosRadix shut down");
        result
    }
}

impl<P: Packet> Drop for QosRadix<P> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        if let Err(e) = self.join_scheduler() {
            error!("Scheduler exited with error: {}", e);
        }
        let discarded = self.core.discard_all();
        if discarded > 0 {
            warn!(discarded, "Packets left in queues on drop");
        }
        debug!("QosRadix dropped");
    }
}
