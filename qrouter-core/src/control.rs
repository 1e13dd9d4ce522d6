//! Control plane: configuration of classes, filters, disciplines and queues.
//!
//! Every operation is available as a method on [`QosControlInterface`] and as
//! a [`QosOp`] value, so a front end can forward parsed commands (or JSON,
//! with the `serde` feature) without knowing the individual methods.

use std::fmt::Debug;
use std::sync::Arc;

use ipnet::Ipv4Net;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classify::{
    Direction, FilterKind, FilterRuleInfo, MatchMode, PortRange, TrafficClass, DEFAULT_CLASS,
};
use crate::core::{CoreStats, PacketCore, Tables};
use crate::error::{ClassTableError, Error};
use crate::packet::Packet;
use crate::qdisc::{Discipline, RedParams};
use crate::queue::{QueueConfig, QueueStats};

#[cfg_attr(
    feature = "serde",
    derive(Deserialize, Serialize),
    serde(tag = "op", rename_all = "snake_case")
)]
#[derive(Debug, Clone, PartialEq)]
pub enum QosOp {
    CreateClass { name: String },
    InsertClass { class: TrafficClass },
    DeleteClass { name: String },
    SetSource { name: String, net: Ipv4Net },
    SetDestination { name: String, net: Ipv4Net },
    SetSourcePorts { name: String, range: PortRange },
    SetDestinationPorts { name: String, range: PortRange },
    SetProtocol { name: String, protocol: u8 },
    SetTos { name: String, tos: u8 },
    SetMatchMode { mode: MatchMode },
    ListClasses,
    AppendFilter { kind: FilterKind, class: String },
    DeleteFilter { index: usize },
    MoveFilter { index: usize, direction: Direction },
    FlushFilters,
    SetFiltering { enabled: bool },
    ListFilters,
    RegisterDiscipline { name: String },
    RegisterRed { params: RedParams },
    ListDisciplines,
    CreateQueue { queue: QueueConfig },
    DeleteQueue { name: String },
    SetWeight { name: String, weight: f64 },
    SetDiscipline { name: String, discipline: String },
    DescribeQueue { name: String },
    ListQueues,
    SetAlternateMode { enabled: bool },
    CoreStats,
}

#[cfg_attr(
    feature = "serde",
    derive(Deserialize, Serialize),
    serde(tag = "result", content = "value", rename_all = "snake_case")
)]
#[derive(Debug, Clone, PartialEq)]
pub enum QosOpResult {
    Done,
    Class(TrafficClass),
    Classes(Vec<TrafficClass>),
    FilterIndex(usize),
    Filter(FilterRuleInfo),
    Filters(Vec<FilterRuleInfo>),
    Disciplines(Vec<Discipline>),
    Queue(QueueStats),
    Queues(Vec<QueueStats>),
    Core(CoreStats),
}

pub struct QosControlInterface<P: Packet> {
    tables: Tables,
    core: Arc<PacketCore<P>>,
}

impl<P: Packet> Clone for QosControlInterface<P> {
    fn clone(&self) -> Self {
        Self {
            tables: self.tables.clone(),
            core: self.core.clone(),
        }
    }
}

impl<P: Packet> Debug for QosControlInterface<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QosControlInterface")
            .field("core", &self.core)
            .finish()
    }
}

// Field setters on the table report unknown (or reserved) names as `false`
fn modified(name: &str, ok: bool) -> Result<(), Error> {
    if ok {
        Ok(())
    } else if name == DEFAULT_CLASS {
        Err(ClassTableError::ReservedClass(name.to_string()).into())
    } else {
        Err(ClassTableError::ClassNotFound(name.to_string()).into())
    }
}

impl<P: Packet> QosControlInterface<P> {
    pub fn new(core: Arc<PacketCore<P>>) -> Self {
        Self {
            tables: core.tables().clone(),
            core,
        }
    }

    pub fn core(&self) -> &Arc<PacketCore<P>> {
        &self.core
    }

    pub fn create_class(&self, name: &str) -> Result<(), Error> {
        self.tables.classes.write().create(name)?;
        Ok(())
    }

    /// Add a class with all of its predicates at once.
    pub fn insert_class(&self, class: TrafficClass) -> Result<(), Error> {
        self.tables.classes.write().insert(class)?;
        Ok(())
    }

    /// Delete a class no filter rule refers to.
    pub fn delete_class(&self, name: &str) -> Result<TrafficClass, Error> {
        let mut classes = self.tables.classes.write();
        if self.tables.filters.read().references(name) {
            warn!(name, "Class is still referenced by a filter rule");
            return Err(ClassTableError::ClassInUse(name.to_string()).into());
        }
        let class = classes.delete(name)?;
        info!(name, "Class deleted");
        Ok(class)
    }

    pub fn set_source(&self, name: &str, net: Ipv4Net) -> Result<(), Error> {
        modified(name, self.tables.classes.write().set_source(name, net))
    }

    pub fn set_destination(&self, name: &str, net: Ipv4Net) -> Result<(), Error> {
        modified(name, self.tables.classes.write().set_destination(name, net))
    }

    pub fn set_source_ports(&self, name: &str, range: PortRange) -> Result<(), Error> {
        modified(name, self.tables.classes.write().set_source_ports(name, range))
    }

    pub fn set_destination_ports(&self, name: &str, range: PortRange) -> Result<(), Error> {
        modified(
            name,
            self.tables.classes.write().set_destination_ports(name, range),
        )
    }

    pub fn set_protocol(&self, name: &str, protocol: u8) -> Result<(), Error> {
        modified(name, self.tables.classes.write().set_protocol(name, protocol))
    }

    pub fn set_tos(&self, name: &str, tos: u8) -> Result<(), Error> {
        modified(name, self.tables.classes.write().set_tos(name, tos))
    }

    pub fn set_match_mode(&self, mode: MatchMode) {
        self.tables.classes.write().set_mode(mode);
    }

    pub fn get_class(&self, name: &str) -> Result<TrafficClass, Error> {
        self.tables
            .classes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ClassTableError::ClassNotFound(name.to_string()).into())
    }

    pub fn list_classes(&self) -> Vec<TrafficClass> {
        self.tables.classes.read().list().to_vec()
    }

    pub fn append_filter(&self, kind: FilterKind, class: &str) -> Result<usize, Error> {
        let classes = self.tables.classes.read();
        let index = self.tables.filters.write().append(kind, class, &classes)?;
        Ok(index)
    }

    pub fn delete_filter(&self, index: usize) -> Result<FilterRuleInfo, Error> {
        Ok(self.tables.filters.write().delete(index)?)
    }

    pub fn move_filter(&self, index: usize, direction: Direction) -> Result<usize, Error> {
        Ok(self.tables.filters.write().reorder(index, direction)?)
    }

    pub fn flush_filters(&self) {
        self.tables.filters.write().flush();
    }

    pub fn set_filtering(&self, enabled: bool) {
        self.tables.filters.write().set_enabled(enabled);
    }

    pub fn list_filters(&self) -> Vec<FilterRuleInfo> {
        self.tables.filters.read().list()
    }

    pub fn register_discipline(&self, name: &str) -> Result<(), Error> {
        self.tables.disciplines.write().register(name)?;
        Ok(())
    }

    pub fn register_red(&self, params: RedParams) -> Result<(), Error> {
        self.tables.disciplines.write().register_red(params)?;
        Ok(())
    }

    pub fn list_disciplines(&self) -> Vec<Discipline> {
        self.tables.disciplines.read().list().to_vec()
    }

    pub fn create_queue(&self, config: QueueConfig) -> Result<(), Error> {
        self.core.create_queue(config)
    }

    pub fn delete_queue(&self, name: &str) -> Result<QueueStats, Error> {
        self.core.delete_queue(name)
    }

    pub fn set_weight(&self, name: &str, weight: f64) -> Result<(), Error> {
        self.core.set_weight(name, weight)
    }

    pub fn set_discipline(&self, name: &str, discipline: &str) -> Result<(), Error> {
        self.core.set_discipline(name, discipline)
    }

    pub fn describe_queue(&self, name: &str) -> Result<QueueStats, Error> {
        self.core.describe_queue(name)
    }

    pub fn list_queues(&self) -> Vec<QueueStats> {
        self.core.list_queues()
    }

    pub fn set_alternate_mode(&self, enabled: bool) {
        self.core.set_alternate_mode(enabled);
    }

    pub fn core_stats(&self) -> CoreStats {
        self.core.stats()
    }

    pub fn execute(&self, op: QosOp) -> Result<QosOpResult, Error> {
        debug!(?op, "Execute op");
        let done = |r: Result<(), Error>| r.map(|_| QosOpResult::Done);
        match op {
            QosOp::CreateClass { name } => done(self.create_class(&name)),
            QosOp::InsertClass { class } => done(self.insert_class(class)),
            QosOp::DeleteClass { name } => self.delete_class(&name).map(QosOpResult::Class),
            QosOp::SetSource { name, net } => done(self.set_source(&name, net)),
            QosOp::SetDestination { name, net } => done(self.set_destination(&name, net)),
            QosOp::SetSourcePorts { name, range } => done(self.set_source_ports(&name, range)),
            QosOp::SetDestinationPorts { name, range } => {
                done(self.set_destination_ports(&name, range))
            }
            QosOp::SetProtocol { name, protocol } => done(self.set_protocol(&name, protocol)),
            QosOp::SetTos { name, tos } => done(self.set_tos(&name, tos)),
            QosOp::SetMatchMode { mode } => {
                self.set_match_mode(mode);
                Ok(QosOpResult::Done)
            }
            QosOp::ListClasses => Ok(QosOpResult::Classes(self.list_classes())),
            QosOp::AppendFilter { kind, class } => self
                .append_filter(kind, &class)
                .map(QosOpResult::FilterIndex),
            QosOp::DeleteFilter { index } => self.delete_filter(index).map(QosOpResult::Filter),
            QosOp::MoveFilter { index, direction } => self
                .move_filter(index, direction)
                .map(QosOpResult::FilterIndex),
            QosOp::FlushFilters => {
                self.flush_filters();
                Ok(QosOpResult::Done)
            }
            QosOp::SetFiltering { enabled } => {
                self.set_filtering(enabled);
                Ok(QosOpResult::Done)
            }
            QosOp::ListFilters => Ok(QosOpResult::Filters(self.list_filters())),
            QosOp::RegisterDiscipline { name } => done(self.register_discipline(&name)),
            QosOp::RegisterRed { params } => done(self.register_red(params)),
            QosOp::ListDisciplines => Ok(QosOpResult::Disciplines(self.list_disciplines())),
            QosOp::CreateQueue { queue } => done(self.create_queue(queue)),
            QosOp::DeleteQueue { name } => self.delete_queue(&name).map(QosOpResult::Queue),
            QosOp::SetWeight { name, weight } => done(self.set_weight(&name, weight)),
            QosOp::SetDiscipline { name, discipline } => {
                done(self.set_discipline(&name, &discipline))
            }
            QosOp::DescribeQueue { name } => self.describe_queue(&name).map(QosOpResult::Queue),
            QosOp::ListQueues => Ok(QosOpResult::Queues(self.list_queues())),
            QosOp::SetAlternateMode { enabled } => {
                self.set_alternate_mode(enabled);
                Ok(QosOpResult::Done)
            }
            QosOp::CoreStats => Ok(QosOpResult::Core(self.core_stats())),
        }
    }

    /// Execute an op given as JSON, e.g. `{"op": "create_class", "name": "voice"}`.
    #[cfg(feature = "serde")]
    pub fn execute_json(&self, payload: serde_json::Value) -> Result<serde_json::Value, Error> {
        let op: QosOp =
            serde_json::from_value(payload).map_err(|e| Error::ConfigError(e.to_string()))?;
        let result = self.execute(op)?;
        Ok(serde_json::to_value(result)?)
    }
}
