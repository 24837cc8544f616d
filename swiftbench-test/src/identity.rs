//! A scripted identity service.

use swiftbench_client::{CatalogEndpoint, IdentityError, IdentityService};

/// Credentials passed to one [`StaticIdentity::authenticate`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthRequest {
    pub url: String,
    pub proxy: Option<String>,
    pub tenant: String,
    pub username: String,
    pub password: String,
}

/// An [`IdentityService`] that answers every request from a fixed script.
///
/// # Example
///
/// ```
/// use swiftbench_client::IdentityService;
/// use swiftbench_test::identity::StaticIdentity;
///
/// let mut identity = StaticIdentity::new("token", "memory://swift/v1/AUTH_test");
/// let token = identity.authenticate("http://identity", None, "t", "u", "p").unwrap();
/// assert_eq!(token, "token");
/// ```
#[derive(Debug, Default)]
pub struct StaticIdentity {
    token: Option<String>,
    storage_url: Option<String>,
    authenticated: bool,
    requests: Vec<AuthRequest>,
}

impl StaticIdentity {
    /// Issues `token` and advertises `storage_url` as the object-store endpoint.
    pub fn new(token: &str, storage_url: &str) -> Self {
        Self {
            token: Some(token.to_owned()),
            storage_url: Some(storage_url.to_owned()),
            ..Default::default()
        }
    }

    /// Rejects every authentication attempt.
    pub fn rejecting() -> Self {
        Self::default()
    }

    /// Issues `token` but advertises no object-store endpoint.
    pub fn without_storage(token: &str) -> Self {
        Self {
            token: Some(token.to_owned()),
            ..Default::default()
        }
    }

    /// All authentication requests received so far.
    pub fn requests(&self) -> &[AuthRequest] {
        &self.requests
    }
}

impl IdentityService for StaticIdentity {
    fn authenticate(
        &mut self,
        url: &str,
        proxy: Option<&str>,
        tenant: &str,
        username: &str,
        password: &str,
    ) -> Result<String, IdentityError> {
        self.requests.push(AuthRequest {
            url: url.to_owned(),
            proxy: proxy.map(str::to_owned),
            tenant: tenant.to_owned(),
            username: username.to_owned(),
            password: password.to_owned(),
        });

        let token = self.token.clone().ok_or(IdentityError::Rejected)?;
        self.authenticated = true;
        Ok(token)
    }

    fn lookup_service_endpoint(&self, service: &str) -> Result<String, IdentityError> {
        if !self.authenticated {
            return Err(IdentityError::NotAuthenticated);
        }

        self.storage_url
            .clone()
            .filter(|_| service == "object-store")
            .ok_or_else(|| IdentityError::EndpointNotFound(service.to_owned()))
    }

    fn service_catalog(&self) -> Vec<CatalogEndpoint> {
        self.storage_url
            .iter()
            .filter(|_| self.authenticated)
            .map(|url| CatalogEndpoint {
                service: "object-store".to_owned(),
                interface: "public",
                url: Some(url.clone()),
            })
            .collect()
    }
}
