//! Scorebox Core
//!
//! Core types and abstractions for the Scorebox scoring system.
//!
//! This crate contains:
//! - Domain types: Core business entities (WorkUnit, DeploymentHandle, ScoringSession, etc.)
//! - DTOs: Wire representations exchanged with the scoring service and object store
//! - Naming: Deterministic, collision-free cluster resource names per work unit

pub mod domain;
pub mod dto;
pub mod naming;
