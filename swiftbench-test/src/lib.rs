//! Test utilities for swiftbench.
//!
//! This crate provides in-memory doubles for the identity and object-storage services, so that
//! benchmark runs can be exercised without a cloud. See the modules for all available utilities.

pub mod identity;
pub mod storage;
pub mod tracing;
