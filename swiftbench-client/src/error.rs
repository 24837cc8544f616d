use std::io;

/// Errors returned by an [`IdentityService`](crate::IdentityService).
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Any error emitted from the underlying [`reqwest`] client, including connection failures and
    /// malformed response bodies.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// The identity service answered with a non-success status code.
    #[error("identity service returned status {0}")]
    Status(u16),
    /// The credentials were accepted by the transport but no usable token was issued.
    #[error("authentication rejected")]
    Rejected,
    /// The service catalog does not contain an endpoint for the requested service.
    #[error("no endpoint for service `{0}` in catalog")]
    EndpointNotFound(String),
    /// A catalog lookup was attempted before a successful authentication.
    #[error("not authenticated")]
    NotAuthenticated,
    /// The identity service URL could not be parsed.
    #[error("invalid identity service url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Errors returned by an [`ObjectStorage`](crate::ObjectStorage) handle.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Any error emitted from the underlying [`reqwest`] client.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// The storage service answered with an unexpected status code.
    #[error("{op} returned status {status}")]
    Status {
        /// The operation that was attempted.
        op: &'static str,
        /// The HTTP status code of the response.
        status: u16,
    },
    /// The data sink refused a chunk and the transfer was cut short.
    #[error("transfer aborted by data sink")]
    Aborted(#[source] io::Error),
    /// IO errors while streaming a request or response body.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The storage endpoint could not be parsed.
    #[error("invalid storage url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// An operation needs a setting that has not been provided yet.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}
