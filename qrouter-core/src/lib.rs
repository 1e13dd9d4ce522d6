//! QoS data plane of a user-space router: traffic classification, filtering,
//! per-class queues with tail-drop or RED admission, and a scheduler thread
//! that releases packets round-robin or by weighted fair queueing.

pub mod channel;
pub mod classify;
pub mod config;
pub mod control;
pub mod core;
pub mod error;
pub mod packet;
pub mod qdisc;
pub mod queue;
pub mod radix;
pub mod scheduler;
pub mod utils;

pub use crate::core::{Admission, DropReason, PacketCore, SchedPolicy};
pub use crate::error::{Error, Result};
pub use crate::packet::{Packet, PacketMeta, StdPacket};
pub use crate::radix::QosRadix;
