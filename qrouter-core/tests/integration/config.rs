use std::io::Write;
use std::time::Duration;

use qrouter_core::config::QosConfig;
use qrouter_core::core::{Admission, SchedPolicy};
use qrouter_core::packet::StdPacket;
use qrouter_core::radix::QosRadix;
use tempfile::NamedTempFile;

use crate::common::*;

const CONFIG: &str = r#"
alternate = true

[core]
name = "edge"
default_capacity = 128

[scheduler]
cycle = "0s"
idle_wait = "1ms"

[[classes]]
name = "voice"
protocol = 17
tos = 16

[[queues]]
name = "voice"
weight = 2.0
capacity = 4
"#;

#[test_log::test]
fn test_load_and_run() -> anyhow::Result<()> {
    let mut file = NamedTempFile::with_suffix(".toml")?;
    file.write_all(CONFIG.as_bytes())?;

    // Only this test touches the environment in this binary
    std::env::set_var("QROUTER_CORE__POLICY", "weighted_fair");
    let config = QosConfig::from_file(file.path().to_string_lossy());
    std::env::remove_var("QROUTER_CORE__POLICY");
    let config = config?;
    assert_eq!(config.core.name, "edge");
    assert_eq!(config.core.policy, SchedPolicy::WeightedFair);
    assert_eq!(config.scheduler.idle_wait, Duration::from_millis(1));

    let mut radix = QosRadix::<StdPacket>::from_config(config)?;
    let mut work_rx = radix.take_work_receiver().unwrap();
    let mut side_rx = radix.take_side_receiver().unwrap();
    assert!(radix.core().alternate_mode());
    assert_eq!(radix.control().describe_queue("default")?.capacity, 128);
    radix.spawn_scheduler()?;

    let core = radix.core().clone();
    assert_eq!(
        core.admit(udp(CLIENT, SERVER, 4000, 5060, 0x10), false),
        Admission::Enqueued {
            queue: "voice".into()
        }
    );
    assert_eq!(core.admit(udp(CLIENT, SERVER, 4000, 53, 0), true), Admission::Bypassed);

    let item = work_rx.blocking_recv().unwrap();
    assert_eq!(&*item.queue, "voice");
    assert!(side_rx.try_recv().is_some());

    radix.shutdown()?;
    let stats = radix.control().core_stats();
    assert_eq!(stats.name, "edge");
    assert_eq!(stats.dispatched, 1);
    Ok(())
}
