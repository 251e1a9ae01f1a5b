//! Service layer
//!
//! Services contain business logic for the runner. They orchestrate
//! operations using repositories; the provisioner turns a work unit into a
//! reachable scoring deployment and removes it again.

pub mod provisioner;

pub use provisioner::{ProvisionError, Provisioner, ProvisionerSettings};
