pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ClassTableError: {0}")]
    ClassTableError(#[from] ClassTableError),
    #[error("FilterError: {0}")]
    FilterError(#[from] FilterError),
    #[error("DisciplineError: {0}")]
    DisciplineError(#[from] DisciplineError),
    #[error("QueueError: {0}")]
    QueueError(#[from] QueueError),
    #[error("Scheduler error: {0}")]
    SchedulerError(String),
    #[error("Encounter IO error, {0}")]
    IoError(#[from] std::io::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Channel error: {0}")]
    ChannelError(String),
    #[cfg(feature = "serde")]
    #[error("Serde error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassTableError {
    #[error("Duplicate class: {0}")]
    DuplicateClass(String),
    #[error("Class not found: {0}")]
    ClassNotFound(String),
    #[error("Class \"{0}\" is reserved")]
    ReservedClass(String),
    #[error("Class \"{0}\" is still referenced by a filter rule")]
    ClassInUse(String),
    #[error("Invalid port range {0}-{1}")]
    InvalidPortRange(u16, u16),
    #[error("Invalid prefix length {0}")]
    InvalidPrefixLength(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("Filter references unknown class: {0}")]
    UnknownClass(String),
    #[error("A filter rule for class \"{0}\" already exists")]
    DuplicateRule(String),
    #[error("Filter index {0} out of range")]
    IndexOutOfRange(usize),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DisciplineError {
    #[error("Duplicate discipline: {0}")]
    DuplicateDiscipline(String),
    #[error("Unknown discipline: {0}")]
    UnknownDiscipline(String),
    #[error("Invalid RED parameters: {0}")]
    InvalidRedParams(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("Duplicate queue: {0}")]
    DuplicateQueue(String),
    #[error("Queue not found: {0}")]
    QueueNotFound(String),
    #[error("Queue \"{0}\" is reserved")]
    ReservedQueue(String),
    #[error("Invalid capacity {0}, must be positive")]
    InvalidCapacity(usize),
    #[error("Invalid weight {0}, must be positive and finite")]
    InvalidWeight(f64),
}
