//! Object-storage client speaking the Swift REST API.

use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use url::Url;

use crate::{DataSource, ObjectStorage, StorageError, http};

/// Header carrying the token issued by the identity service.
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Size of the buffer used to hand downloaded data to the sink.
const CHUNK_SIZE: usize = 64 * 1024;

/// An [`ObjectStorage`] handle talking to a Swift proxy over HTTP.
///
/// The underlying [`reqwest::blocking::Client`] is rebuilt whenever the proxy or timeout changes,
/// so those settings should be applied before the first request.
pub struct SwiftClient {
    client: Client,
    proxy: Option<String>,
    timeout: Option<Duration>,
    endpoint: Option<Url>,
    token: Option<String>,
    container: Option<String>,
    object: Option<String>,
}

impl SwiftClient {
    /// Creates a handle using the system proxy settings and no request timeout.
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            client: build_client(None, None)?,
            proxy: None,
            timeout: None,
            endpoint: None,
            token: None,
            container: None,
            object: None,
        })
    }

    fn container_url(&self) -> Result<Url, StorageError> {
        let container = self
            .container
            .as_deref()
            .ok_or(StorageError::NotConfigured("container"))?;
        self.resource_url(&[container])
    }

    fn object_url(&self) -> Result<Url, StorageError> {
        let container = self
            .container
            .as_deref()
            .ok_or(StorageError::NotConfigured("container"))?;
        let object = self
            .object
            .as_deref()
            .ok_or(StorageError::NotConfigured("object"))?;
        self.resource_url(&[container, object])
    }

    fn resource_url(&self, segments: &[&str]) -> Result<Url, StorageError> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or(StorageError::NotConfigured("endpoint"))?;
        resource_url(endpoint, segments)
    }

    fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, StorageError> {
        let token = self
            .token
            .as_deref()
            .ok_or(StorageError::NotConfigured("auth token"))?;
        Ok(self
            .client
            .request(method, url)
            .header(AUTH_TOKEN_HEADER, token))
    }
}

impl fmt::Debug for SwiftClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwiftClient")
            .field("proxy", &self.proxy)
            .field("timeout", &self.timeout)
            .field("endpoint", &self.endpoint.as_ref().map(Url::as_str))
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .field("container", &self.container)
            .field("object", &self.object)
            .finish()
    }
}

impl ObjectStorage for SwiftClient {
    fn set_endpoint(&mut self, url: &str) -> Result<(), StorageError> {
        self.endpoint = Some(Url::parse(url)?);
        Ok(())
    }

    fn set_auth_token(&mut self, token: &str) -> Result<(), StorageError> {
        self.token = Some(token.to_owned());
        Ok(())
    }

    fn set_proxy(&mut self, proxy: Option<&str>) -> Result<(), StorageError> {
        self.client = build_client(proxy, self.timeout)?;
        self.proxy = proxy.map(str::to_owned);
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), StorageError> {
        self.client = build_client(self.proxy.as_deref(), timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn create_container(&mut self, name: &str) -> Result<(), StorageError> {
        self.container = Some(name.to_owned());
        let url = self.container_url()?;
        let response = self.request(Method::PUT, url)?.send()?;
        check_status("create container", response).map(drop)
    }

    fn select_object(&mut self, name: &str) {
        self.object = Some(name.to_owned());
    }

    fn put(&mut self, source: DataSource, len: u64) -> Result<(), StorageError> {
        let url = self.object_url()?;
        let response = self
            .request(Method::PUT, url)?
            .body(Body::sized(source, len))
            .send()?;
        check_status("put object", response).map(drop)
    }

    fn get(&mut self, sink: &mut dyn Write) -> Result<(), StorageError> {
        let url = self.object_url()?;
        let response = self.request(Method::GET, url)?.send()?;
        let mut response = check_status("get object", response)?;

        let mut buf = vec![0; CHUNK_SIZE];
        loop {
            let read = response.read(&mut buf)?;
            if read == 0 {
                return Ok(());
            }
            sink.write_all(&buf[..read]).map_err(StorageError::Aborted)?;
        }
    }

    fn delete_object(&mut self) -> Result<(), StorageError> {
        let url = self.object_url()?;
        let response = self.request(Method::DELETE, url)?.send()?;
        check_status("delete object", response).map(drop)
    }

    fn delete_container(&mut self) -> Result<(), StorageError> {
        let url = self.container_url()?;
        let response = self.request(Method::DELETE, url)?.send()?;
        check_status("delete container", response).map(drop)
    }
}

fn build_client(proxy: Option<&str>, timeout: Option<Duration>) -> Result<Client, StorageError> {
    Ok(http::client(proxy, timeout)?)
}

/// Appends percent-encoded path segments to the storage account URL.
fn resource_url(endpoint: &Url, segments: &[&str]) -> Result<Url, StorageError> {
    let cannot_be_a_base = url::ParseError::RelativeUrlWithCannotBeABaseBase;

    let mut url = endpoint.clone();
    url.path_segments_mut()
        .map_err(|()| StorageError::InvalidUrl(cannot_be_a_base))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn check_status(op: &'static str, response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    tracing::trace!(op, %status, "storage response");
    if status.is_success() {
        Ok(response)
    } else {
        Err(StorageError::Status {
            op,
            status: status.as_u16(),
        })
    }
}
