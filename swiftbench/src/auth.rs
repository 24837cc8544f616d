//! The auth stage, which runs once before any worker exists.

use std::fmt;

use secrecy::ExposeSecret;
use swiftbench_client::{IdentityError, IdentityService};

use crate::config::BenchmarkConfig;

/// Catalog service type of the object-storage service.
pub const OBJECT_STORAGE_SERVICE: &str = "object-store";

/// Token and storage endpoint shared read-only by every worker.
///
/// Both values are guaranteed to be non-empty.
#[derive(Clone)]
pub struct AuthResult {
    token: String,
    storage_url: String,
}

impl AuthResult {
    /// The token sent with every storage request.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The base URL of the storage account.
    pub fn storage_url(&self) -> &str {
        &self.storage_url
    }
}

impl fmt::Debug for AuthResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResult")
            .field("token", &"[redacted]")
            .field("storage_url", &self.storage_url)
            .finish()
    }
}

/// Obtains a token and the object-storage endpoint from the identity service.
///
/// Either both values are available or an error is returned. With `debug` enabled, every endpoint
/// of the catalog is logged.
pub fn authenticate<I>(identity: &mut I, config: &BenchmarkConfig) -> Result<AuthResult, IdentityError>
where
    I: IdentityService + ?Sized,
{
    let token = identity.authenticate(
        &config.auth_url,
        config.proxy.as_deref(),
        &config.tenant_name,
        &config.username,
        config.password.expose_secret().as_str(),
    )?;
    if token.is_empty() {
        return Err(IdentityError::Rejected);
    }

    if config.debug {
        for endpoint in identity.service_catalog() {
            tracing::debug!(
                service = %endpoint.service,
                interface = endpoint.interface,
                url = endpoint.url.as_deref().unwrap_or("-"),
                "catalog endpoint"
            );
        }
    }

    let storage_url = identity.lookup_service_endpoint(OBJECT_STORAGE_SERVICE)?;
    if storage_url.is_empty() {
        return Err(IdentityError::EndpointNotFound(
            OBJECT_STORAGE_SERVICE.to_owned(),
        ));
    }

    tracing::info!(%storage_url, "authenticated");
    Ok(AuthResult { token, storage_url })
}

#[cfg(test)]
impl AuthResult {
    pub(crate) fn new(token: &str, storage_url: &str) -> Self {
        Self {
            token: token.to_owned(),
            storage_url: storage_url.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use swiftbench_test::identity::StaticIdentity;

    use super::*;

    fn config() -> BenchmarkConfig {
        let mut config = BenchmarkConfig::new(
            "https://identity.example.com:5000/v2.0",
            "bench",
            "swift",
            "hunter2",
        );
        config.proxy = Some("http://proxy.example.com:3128".into());
        config.debug = true;
        config
    }

    #[test]
    fn returns_token_and_endpoint() {
        swiftbench_test::tracing::init();
        let mut identity = StaticIdentity::new("tk-1", "https://swift.example.com/v1/AUTH_bench");

        let auth = authenticate(&mut identity, &config()).unwrap();
        assert_eq!(auth.token(), "tk-1");
        assert_eq!(auth.storage_url(), "https://swift.example.com/v1/AUTH_bench");

        let requests = identity.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://identity.example.com:5000/v2.0");
        assert_eq!(requests[0].proxy.as_deref(), Some("http://proxy.example.com:3128"));
        assert_eq!(requests[0].tenant, "bench");
        assert_eq!(requests[0].username, "swift");
        assert_eq!(requests[0].password, "hunter2");
    }

    #[test]
    fn rejected_credentials_fail() {
        let mut identity = StaticIdentity::rejecting();
        let err = authenticate(&mut identity, &config()).unwrap_err();
        assert!(matches!(err, IdentityError::Rejected));
    }

    #[test]
    fn empty_token_fails() {
        let mut identity = StaticIdentity::new("", "https://swift.example.com/v1/AUTH_bench");
        let err = authenticate(&mut identity, &config()).unwrap_err();
        assert!(matches!(err, IdentityError::Rejected));
    }

    #[test]
    fn missing_storage_endpoint_fails() {
        let mut identity = StaticIdentity::without_storage("tk-1");
        let err = authenticate(&mut identity, &config()).unwrap_err();
        assert!(matches!(err, IdentityError::EndpointNotFound(service) if service == "object-store"));
    }

    #[test]
    fn empty_storage_endpoint_fails() {
        let mut identity = StaticIdentity::new("tk-1", "");
        let err = authenticate(&mut identity, &config()).unwrap_err();
        assert!(matches!(err, IdentityError::EndpointNotFound(_)));
    }

    #[test]
    fn debug_output_hides_token() {
        let auth = AuthResult::new("tk-secret", "https://swift.example.com/v1/AUTH_bench");
        let output = format!("{auth:?}");
        assert!(!output.contains("tk-secret"));
        assert!(output.contains("AUTH_bench"));
    }
}
