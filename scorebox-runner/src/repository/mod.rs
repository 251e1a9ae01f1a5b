//! Repository layer
//!
//! Repositories abstract the external systems a scoring run touches: the
//! object store holding inputs and outputs, the cluster running model
//! deployments and the registry holding model images. They provide simple,
//! focused interfaces without any business logic.
//!
//! All repositories are trait-based to enable testing and mocking.

pub mod cluster;
pub mod registry;
pub mod store;

// Re-export traits
pub use cluster::ClusterApi;
pub use registry::ImageRegistry;
pub use store::ObjectStore;

// Re-export implementations
pub use cluster::KubectlCluster;
pub use registry::PodmanRegistry;
pub use store::FsObjectStore;
