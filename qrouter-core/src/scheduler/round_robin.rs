use crate::core::{Dequeued, PacketCore};
use crate::packet::Packet;

use super::ServicePolicy;

/// Serves queues in registration order, resuming after the last queue that
/// gave up a packet and skipping empty ones.
#[derive(Debug, Default)]
pub struct RoundRobin {
    last: Option<usize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<P: Packet> ServicePolicy<P> for RoundRobin {
    fn next(&mut self, core: &PacketCore<P>) -> Option<Dequeued<P>> {
        // Queues may be created or deleted between cycles
        let names = core.queue_names();
        let count = names.len();
        if count == 0 {
            return None;
        }
        let start = self.last.map_or(0, |last| (last + 1) % count);
        (0..count)
            .map(|offset| (start + offset) % count)
            .find_map(|index| {
                let dequeued = core.try_dequeue(&names[index])?;
                self.last = Some(index);
                Some(dequeued)
            })
    }
}
