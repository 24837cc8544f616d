//! Concurrency benchmark for OpenStack object storage.
//!
//! A run authenticates once against the identity service, then drives a number of workers on
//! their own threads. Every worker creates a container, waits at a shared
//! [`StartBarrier`](barrier::StartBarrier), uploads and downloads its own object, optionally
//! verifies what it downloaded, and deletes everything again. The [`orchestrator`] joins all
//! workers and collects their phase timings into a [`RunReport`](report::RunReport).
//!
//! Worker failures are isolated: one failing worker never affects the others, and the run as a
//! whole fails if any worker failed.

pub mod auth;
pub mod barrier;
pub mod cli;
pub mod config;
pub mod observability;
pub mod orchestrator;
pub mod payload;
pub mod report;
pub mod worker;
