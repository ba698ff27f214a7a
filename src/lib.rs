//! Constraint analyzer and best-first search for Dom0/DomU cluster
//! placement.
//!
//! The core pipeline: an immutable [`topology`] describes the cluster; a
//! [`configuration::Configuration`] pins down a candidate placement;
//! [`analysis::analyze`] scores it against a fixed rule catalogue;
//! [`heuristic`] turns that score into a cost-to-go estimate; and
//! [`search::optimize`] drives best-first search over legal
//! [`search::moves::Move`]s toward an optimal configuration.

pub mod analysis;
pub mod configuration;
pub mod error;
pub mod heuristic;
pub mod search;
pub mod sink;
pub mod topology;

pub use analysis::{analyze, is_optimal, AlertLevel, AnalysisResult, ResultPayload};
pub use configuration::{Configuration, ConfigFingerprint, DiskPlacement, DomUPlacement, PhysicalVolumeConfiguration};
pub use error::{ClusterError, Result};
pub use heuristic::{exponential, least_informed};
pub use search::moves::{generate_successors, Move};
pub use search::{optimize, SearchOptions, SearchOutcome};
pub use sink::{CollectingSink, CountingSink, ResultSink};
pub use topology::{Cluster, Dom0, Dom0Disk, DomU, DomUDisk, ProcessorArchitecture, ProcessorType};
