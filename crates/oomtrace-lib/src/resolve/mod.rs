//! Resolution of jobs to nodes and containers

mod cluster;
mod container;
mod location;
pub mod patterns;

pub use cluster::KubeCluster;
pub use container::{AmbiguousPick, ContainerResolver, Resolution};
pub use location::{
    locate_from_events, ClusterApi, JobLocations, LocateMethod, LocationResolver,
    DEFAULT_NODE_SELECTOR,
};

#[cfg(test)]
pub(crate) use location::testing;
