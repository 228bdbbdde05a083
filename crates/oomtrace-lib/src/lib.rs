//! Post-mortem investigation of automation jobs killed for memory
//!
//! This crate provides the core functionality for:
//! - Locating the node a job ran on (scheduler events, node journal scan)
//! - Resolving the job's container from kubelet/CRI-O journal records
//! - Classifying the termination as eviction or kernel OOM kill
//! - Extracting memory accounting from kernel OOM reports
//! - Reading evidence from live nodes or extracted sosreport bundles

pub mod analysis;
pub mod error;
pub mod investigate;
pub mod models;
pub mod observability;
pub mod resolve;
pub mod source;

pub use error::{Result, TraceError};
pub use investigate::{InvestigationOptions, LiveInvestigation, OfflineInvestigation, RunOutcome};
pub use models::*;
pub use observability::InvestigationLogger;
