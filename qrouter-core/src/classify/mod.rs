//! Traffic classes and the filter list that references them.

pub mod class;
pub mod filter;

pub use class::*;
pub use filter::*;
