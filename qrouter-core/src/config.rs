#[cfg(feature = "serde")]
use std::path::Path;

#[cfg(feature = "serde")]
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classify::{FilterKind, MatchMode, TrafficClass};
use crate::control::QosControlInterface;
use crate::core::{CoreConfig, Tables};
use crate::error::Error;
use crate::packet::Packet;
use crate::qdisc::RedParams;
use crate::queue::QueueConfig;
use crate::scheduler::SchedulerConfig;

/// Prefix of environment variables overriding file values. Nested keys are
/// separated by a double underscore, e.g. `QROUTER_CORE__POLICY`.
pub const ENV_PREFIX: &str = "QROUTER_";

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    pub kind: FilterKind,
    pub class: String,
}

/// Configuration for a whole QoS instance.
#[cfg_attr(
    feature = "serde",
    serde_with::skip_serializing_none,
    derive(Serialize, Deserialize)
)]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QosConfig {
    #[cfg_attr(feature = "serde", serde(default))]
    pub core: CoreConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub scheduler: SchedulerConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub match_mode: MatchMode,
    /// Enable the filter list
    #[cfg_attr(feature = "serde", serde(default))]
    pub filtering: bool,
    /// Enable alternate forwarding through the side channel
    #[cfg_attr(feature = "serde", serde(default))]
    pub alternate: bool,
    /// Extra tail-drop disciplines
    #[cfg_attr(feature = "serde", serde(default))]
    pub disciplines: Vec<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub red: Option<RedParams>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub classes: Vec<TrafficClass>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub filters: Vec<FilterConfig>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub queues: Vec<QueueConfig>,
}

impl QosConfig {
    /// Load a TOML or JSON file (chosen by extension), then apply `QROUTER_`
    /// environment overrides. `${VAR}` in the path is expanded first.
    #[cfg(feature = "serde")]
    pub fn from_file<S: AsRef<str>>(path: S) -> Result<Self, Error> {
        let path = crate::utils::replace_env_var_in_string(path.as_ref()).into_owned();
        let file_path = Path::new(&path);
        if !file_path.is_file() {
            return Err(Error::ConfigError(format!(
                "Config file not found: {}",
                file_path.display()
            )));
        }
        let figment = match file_path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Figment::new().merge(Toml::file(file_path)),
            Some("json") => Figment::new().merge(Json::file(file_path)),
            _ => {
                return Err(Error::ConfigError(format!(
                    "Unknown config file format: {}",
                    file_path.display()
                )))
            }
        };
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        info!(path = %file_path.display(), "Loaded QoS config");
        Ok(config)
    }

    /// Build the class table, filter list and discipline catalog.
    ///
    /// Disciplines must exist before the core is built, since its `default`
    /// queue adopts one of them.
    pub fn build_tables(&self) -> Result<Tables, Error> {
        let tables = Tables::new();
        {
            let mut disciplines = tables.disciplines.write();
            for name in &self.disciplines {
                disciplines.register(name)?;
            }
            if let Some(params) = self.red {
                disciplines.register_red(params)?;
            }
        }
        {
            let mut classes = tables.classes.write();
            classes.set_mode(self.match_mode);
            for class in &self.classes {
                classes.insert(class.clone())?;
            }
            let mut filters = tables.filters.write();
            for filter in &self.filters {
                filters.append(filter.kind, &filter.class, &classes)?;
            }
            filters.set_enabled(self.filtering);
        }
        debug!(
            classes = self.classes.len(),
            filters = self.filters.len(),
            "Built QoS tables"
        );
        Ok(tables)
    }

    /// Create the configured queues and set the forwarding mode.
    pub fn apply<P: Packet>(&self, control: &QosControlInterface<P>) -> Result<(), Error> {
        for queue in &self.queues {
            control.create_queue(queue.clone())?;
        }
        control.set_alternate_mode(self.alternate);
        info!(
            queues = self.queues.len(),
            alternate = self.alternate,
            "Applied QoS config"
        );
        Ok(())
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use std::time::Duration;

    use figment::{
        providers::{Format, Toml},
        Figment,
    };

    use super::*;
    use crate::core::SchedPolicy;
    use crate::error::FilterError;

    const CONFIG: &str = r#"
        match_mode = "strict"
        filtering = true
        disciplines = ["fifo"]
        red = { min_threshold = 0.2, max_threshold = 0.8, max_probability = 0.1 }

        [core]
        policy = "weighted_fair"
        default_capacity = 64
        red_seed = 7

        [scheduler]
        cycle = "100us"

        [[classes]]
        name = "voice"
        protocol = 17
        destination_ports = { start = 5060, end = 5061 }

        [[classes]]
        name = "lan"
        source = "192.168.1.77/24"

        [[filters]]
        kind = "deny"
        class = "lan"

        [[queues]]
        name = "voice"
        weight = 4.0
        delay = 50
        capacity = 32

        [[queues]]
        name = "bulk"
        discipline = "red"
    "#;

    fn parse(text: &str) -> QosConfig {
        Figment::new().merge(Toml::string(text)).extract().unwrap()
    }

    #[test_log::test]
    fn test_parse() {
        let config = parse(CONFIG);
        assert_eq!(config.core.policy, SchedPolicy::WeightedFair);
        assert_eq!(config.core.default_capacity, 64);
        assert_eq!(config.core.name, "qrouter");
        assert_eq!(config.scheduler.cycle, Duration::from_micros(100));
        assert_eq!(config.scheduler.idle_wait, Duration::from_millis(10));
        assert_eq!(config.match_mode, MatchMode::Strict);
        assert_eq!(config.queues[0].delay, Duration::from_micros(50));
        assert_eq!(config.queues[1].capacity, crate::queue::DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.queues[1].weight, 1.0);
        assert!(!config.alternate);
    }

    #[test_log::test]
    fn test_build_tables() -> Result<(), Error> {
        let tables = parse(CONFIG).build_tables()?;
        let classes = tables.classes.read();
        assert_eq!(classes.mode(), MatchMode::Strict);
        assert_eq!(
            classes.get("lan").and_then(|c| c.source),
            Some("192.168.1.0/24".parse().unwrap())
        );
        let filters = tables.filters.read();
        assert!(filters.is_enabled());
        assert_eq!(filters.len(), 1);
        let disciplines = tables.disciplines.read();
        assert!(disciplines.get("fifo").is_some());
        assert!(disciplines.get("red").is_some());
        Ok(())
    }

    #[test_log::test]
    fn test_filter_on_unknown_class() {
        let config = parse(
            r#"
            [[filters]]
            kind = "allow"
            class = "video"
        "#,
        );
        assert!(matches!(
            config.build_tables(),
            Err(Error::FilterError(FilterError::UnknownClass(_)))
        ));
    }

    #[test_log::test]
    fn test_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qos.yaml");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            QosConfig::from_file(path.to_string_lossy()),
            Err(Error::ConfigError(_))
        ));
        assert!(matches!(
            QosConfig::from_file("/nonexistent/qos.toml"),
            Err(Error::ConfigError(_))
        ));
    }
}
