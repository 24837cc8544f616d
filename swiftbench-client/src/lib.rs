//! Blocking clients for the services a benchmark run talks to.
//!
//! The benchmark engine only ever sees the [`IdentityService`] and [`ObjectStorage`] traits. This
//! crate provides the HTTP implementations used in production runs:
//!
//! - [`KeystoneClient`] obtains an auth token and the object-storage endpoint from an identity
//!   service speaking the v2.0 tokens API.
//! - [`SwiftClient`] performs container and object operations against that endpoint.
//!
//! All calls block the calling thread. Each benchmark worker owns its own [`SwiftClient`], so no
//! client state is shared between threads.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod error;
mod http;
mod identity;
mod keystone;
mod storage;
mod swift;

pub use error::{IdentityError, StorageError};
pub use identity::{CatalogEndpoint, IdentityService};
pub use keystone::KeystoneClient;
pub use storage::{DataSource, ObjectStorage};
pub use swift::SwiftClient;

/// User agent string used for outgoing requests.
pub const USER_AGENT: &str = concat!("swiftbench/", env!("CARGO_PKG_VERSION"));
