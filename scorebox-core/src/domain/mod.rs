//! Core domain types
//!
//! This module contains the core domain structures used across Scorebox crates.
//! These types describe a unit of work, the cluster resources provisioned for it,
//! the scoring sessions driven against those resources and the job lifecycle.

pub mod deployment;
pub mod job;
pub mod session;
pub mod work_unit;
