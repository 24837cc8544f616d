use std::fmt::Debug;

use crate::IdentityError;

/// A single endpoint advertised in the identity service's catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEndpoint {
    /// The service type, such as `object-store`.
    pub service: String,
    /// The endpoint interface: `public`, `internal` or `admin`.
    pub interface: &'static str,
    /// The endpoint URL, if the catalog lists one for this interface.
    pub url: Option<String>,
}

/// Issues auth tokens and resolves service endpoints.
pub trait IdentityService: Debug {
    /// Authenticates with the given credentials and returns the issued token.
    fn authenticate(
        &mut self,
        url: &str,
        proxy: Option<&str>,
        tenant: &str,
        username: &str,
        password: &str,
    ) -> Result<String, IdentityError>;

    /// Returns the public URL of the given service type from the catalog of the last successful
    /// authentication.
    fn lookup_service_endpoint(&self, service: &str) -> Result<String, IdentityError>;

    /// Lists every endpoint of the last successful authentication's catalog.
    ///
    /// Only used for diagnostics, so implementations without a catalog may return nothing.
    fn service_catalog(&self) -> Vec<CatalogEndpoint> {
        Vec::new()
    }
}
