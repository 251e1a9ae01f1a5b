//! Data Transfer Objects
//!
//! Lightweight wire representations exchanged with the remote scoring
//! service and written to the object store as metadata.

pub mod scoring;
pub mod tags;
