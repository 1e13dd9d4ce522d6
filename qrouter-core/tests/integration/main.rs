mod common;
#[cfg(feature = "serde")]
mod config;
mod scenario;
mod scheduler;
