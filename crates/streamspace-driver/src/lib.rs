//! Host Driver Interface: the contract between the agent runtime and
//! whatever actually runs a workload (containers, pods, VMs).
//!
//! Only [`HostDriver`] is public API other crates should depend on.
//! Concrete backends are swappable and never leak backend-specific types
//! across the trait boundary.

mod docker;
pub mod driver;
pub mod types;

#[cfg(feature = "kubernetes")]
mod k8s;

pub use docker::{ContainerEngine, DockerDriver, DockerDriverConfig};
pub use driver::HostDriver;
pub use types::{
    CreateWorkloadRequest, DriverError, DriverResult, Mount, ResourceLimits, RunningWorkload,
    WaitDeadline, WorkloadId, WorkloadState,
};

#[cfg(feature = "kubernetes")]
pub use k8s::{KubernetesDriver, KubernetesDriverConfig};
