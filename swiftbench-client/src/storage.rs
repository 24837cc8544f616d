use std::fmt::Debug;
use std::io::{Read, Write};
use std::time::Duration;

use crate::StorageError;

/// A source of object contents that the put path pulls from on demand.
///
/// Buffers are passed as a cursor over shared bytes, while all-zero objects can be synthesized with
/// [`std::io::repeat`] without materializing them.
pub type DataSource = Box<dyn Read + Send>;

/// A handle to the object-storage service.
///
/// A handle is stateful: it remembers the endpoint, the token, the container passed to
/// [`create_container`](Self::create_container) and the object passed to
/// [`select_object`](Self::select_object). All operations block until the service responds.
pub trait ObjectStorage: Debug + Send {
    /// Sets the base URL of the storage account.
    fn set_endpoint(&mut self, url: &str) -> Result<(), StorageError>;

    /// Sets the token sent with every request.
    fn set_auth_token(&mut self, token: &str) -> Result<(), StorageError>;

    /// Routes all requests through the given proxy, or falls back to the system proxy settings
    /// (such as `HTTPS_PROXY` and `NO_PROXY`) for `None`.
    fn set_proxy(&mut self, proxy: Option<&str>) -> Result<(), StorageError>;

    /// Bounds the duration of every subsequent call, or removes the bound for `None`.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), StorageError>;

    /// Creates the named container and makes it the target of subsequent operations.
    fn create_container(&mut self, name: &str) -> Result<(), StorageError>;

    /// Makes the named object the target of subsequent object operations.
    fn select_object(&mut self, name: &str);

    /// Uploads `len` bytes pulled from `source` into the selected object.
    fn put(&mut self, source: DataSource, len: u64) -> Result<(), StorageError>;

    /// Downloads the selected object, pushing every received chunk into `sink`.
    ///
    /// If the sink returns an error, the transfer is abandoned and
    /// [`StorageError::Aborted`] is returned.
    fn get(&mut self, sink: &mut dyn Write) -> Result<(), StorageError>;

    /// Deletes the selected object.
    fn delete_object(&mut self) -> Result<(), StorageError>;

    /// Deletes the container created last.
    fn delete_container(&mut self) -> Result<(), StorageError>;
}
