//! Identity service client speaking the v2.0 tokens API.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::{CatalogEndpoint, IdentityError, IdentityService, http};

/// An [`IdentityService`] backed by an OpenStack identity service.
///
/// The client keeps the access document of the last successful authentication, so that endpoints
/// can be looked up afterwards without another round trip.
#[derive(Debug, Default)]
pub struct KeystoneClient {
    timeout: Option<Duration>,
    access: Option<Access>,
}

impl KeystoneClient {
    /// Creates a client without a request timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds the duration of the authentication request.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn http_client(&self, proxy: Option<&str>) -> Result<Client, reqwest::Error> {
        http::client(proxy, self.timeout)
    }
}

impl IdentityService for KeystoneClient {
    fn authenticate(
        &mut self,
        url: &str,
        proxy: Option<&str>,
        tenant: &str,
        username: &str,
        password: &str,
    ) -> Result<String, IdentityError> {
        let url = tokens_url(url)?;
        let body = json!({
            "auth": {
                "tenantName": tenant,
                "passwordCredentials": {
                    "username": username,
                    "password": password,
                },
            },
        });

        tracing::debug!(%url, tenant, username, "requesting token");
        let response = self.http_client(proxy)?.post(url).json(&body).send()?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(IdentityError::Rejected);
            }
            status if !status.is_success() => {
                return Err(IdentityError::Status(status.as_u16()));
            }
            _ => {}
        }

        let TokenResponse { access } = response.json()?;
        if access.token.id.is_empty() {
            return Err(IdentityError::Rejected);
        }

        let token = access.token.id.clone();
        self.access = Some(access);
        Ok(token)
    }

    fn lookup_service_endpoint(&self, service: &str) -> Result<String, IdentityError> {
        let access = self.access.as_ref().ok_or(IdentityError::NotAuthenticated)?;
        access.public_url(service)
    }

    fn service_catalog(&self) -> Vec<CatalogEndpoint> {
        self.access
            .as_ref()
            .map(Access::catalog)
            .unwrap_or_default()
    }
}

/// Appends the `tokens` resource to the identity service base URL.
fn tokens_url(base: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!("{}/tokens", base.trim_end_matches('/')))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access: Access,
}

#[derive(Debug, Deserialize)]
struct Access {
    token: Token,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<Service>,
}

impl Access {
    fn public_url(&self, service: &str) -> Result<String, IdentityError> {
        self.service_catalog
            .iter()
            .filter(|entry| entry.kind == service)
            .flat_map(|entry| &entry.endpoints)
            .find_map(|endpoint| endpoint.public_url.clone())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| IdentityError::EndpointNotFound(service.to_owned()))
    }

    fn catalog(&self) -> Vec<CatalogEndpoint> {
        let mut catalog = Vec::new();
        for service in &self.service_catalog {
            for endpoint in &service.endpoints {
                for (interface, url) in [
                    ("public", &endpoint.public_url),
                    ("internal", &endpoint.internal_url),
                    ("admin", &endpoint.admin_url),
                ] {
                    catalog.push(CatalogEndpoint {
                        service: service.kind.clone(),
                        interface,
                        url: url.clone(),
                    });
                }
            }
        }
        catalog
    }
}

#[derive(Deserialize)]
struct Token {
    id: String,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token").field("id", &"[redacted]").finish()
    }
}

#[derive(Debug, Deserialize)]
struct Service {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    endpoints: Vec<Endpoint>,
}

#[derive(Debug, Deserialize)]
struct Endpoint {
    #[serde(rename = "publicURL")]
    public_url: Option<String>,
    #[serde(rename = "internalURL")]
    internal_url: Option<String>,
    #[serde(rename = "adminURL")]
    admin_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCESS: &str = r#"{
        "access": {
            "token": { "id": "gAAAAABk", "expires": "2030-01-01T00:00:00Z" },
            "serviceCatalog": [
                {
                    "type": "compute",
                    "name": "nova",
                    "endpoints": [{ "publicURL": "https://compute.example.com/v2" }]
                },
                {
                    "type": "object-store",
                    "name": "swift",
                    "endpoints": [{
                        "region": "RegionOne",
                        "publicURL": "https://swift.example.com/v1/AUTH_test",
                        "internalURL": "http://10.0.0.1:8080/v1/AUTH_test",
                        "adminURL": "http://10.0.0.1:8080"
                    }]
                }
            ]
        }
    }"#;

    fn authenticated() -> KeystoneClient {
        let TokenResponse { access } = serde_json::from_str(ACCESS).unwrap();
        KeystoneClient {
            timeout: None,
            access: Some(access),
        }
    }

    #[test]
    fn appends_tokens_resource() {
        let url = tokens_url("https://identity.example.com:5000/v2.0/").unwrap();
        assert_eq!(url.as_str(), "https://identity.example.com:5000/v2.0/tokens");

        let url = tokens_url("https://identity.example.com:5000/v2.0").unwrap();
        assert_eq!(url.as_str(), "https://identity.example.com:5000/v2.0/tokens");
    }

    #[test]
    fn rejects_invalid_identity_url() {
        assert!(tokens_url("not a url").is_err());
    }

    #[test]
    fn finds_object_store_endpoint() {
        let client = authenticated();
        let url = client.lookup_service_endpoint("object-store").unwrap();
        assert_eq!(url, "https://swift.example.com/v1/AUTH_test");
    }

    #[test]
    fn missing_service_is_an_error() {
        let client = authenticated();
        let err = client.lookup_service_endpoint("image").unwrap_err();
        assert!(matches!(err, IdentityError::EndpointNotFound(service) if service == "image"));
    }

    #[test]
    fn lookup_requires_authentication() {
        let client = KeystoneClient::new();
        let err = client.lookup_service_endpoint("object-store").unwrap_err();
        assert!(matches!(err, IdentityError::NotAuthenticated));
    }

    #[test]
    fn lists_every_catalog_interface() {
        let catalog = authenticated().service_catalog();
        assert_eq!(catalog.len(), 6);

        let internal = catalog
            .iter()
            .find(|e| e.service == "object-store" && e.interface == "internal")
            .unwrap();
        assert_eq!(
            internal.url.as_deref(),
            Some("http://10.0.0.1:8080/v1/AUTH_test")
        );

        let compute_admin = catalog
            .iter()
            .find(|e| e.service == "compute" && e.interface == "admin")
            .unwrap();
        assert_eq!(compute_admin.url, None);
    }

    #[test]
    fn debug_output_hides_token() {
        let output = format!("{:?}", authenticated());
        assert!(!output.contains("gAAAAABk"));
    }

    #[test]
    fn timeout_bounds_authentication() {
        let base = http::slow_server(Duration::from_secs(2), "200 OK");
        let mut client = KeystoneClient::new().with_timeout(Some(Duration::from_millis(200)));

        let err = client
            .authenticate(&format!("{base}/v2.0"), None, "bench", "swift", "secret")
            .unwrap_err();
        assert!(
            matches!(&err, IdentityError::Reqwest(source) if source.is_timeout()),
            "{err:?}"
        );
        assert!(matches!(
            client.lookup_service_endpoint("object-store"),
            Err(IdentityError::NotAuthenticated)
        ));
    }
}
