//! Command implementations

pub mod live;
pub mod offline;
