//! In-memory object storage with fault injection.
//!
//! [`InMemoryStore`] plays the storage service. Every worker connects its own [`InMemoryStorage`]
//! handle through [`InMemoryStore::connect`]. The store is [`Clone`] so tests can hold a copy for
//! injecting faults up front and inspecting the outcome after the run.
//!
//! Faults are keyed by the ordinal of the worker whose handle performs the operation.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use swiftbench_client::{DataSource, ObjectStorage, StorageError};

/// Size of the chunks pushed into the sink on get.
///
/// Deliberately not a power of two, so that chunk boundaries fall at odd offsets.
const CHUNK_SIZE: usize = 1000;

/// A storage operation that faults can be injected into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    CreateContainer,
    Put,
    Get,
    DeleteObject,
    DeleteContainer,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::CreateContainer => "create container",
            Operation::Put => "put object",
            Operation::Get => "get object",
            Operation::DeleteObject => "delete object",
            Operation::DeleteContainer => "delete container",
        }
    }
}

/// Settings a handle was configured with, captured when it is released.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HandleSettings {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub proxy: Option<String>,
    pub timeout: Option<Duration>,
}

type Container = HashMap<String, Bytes>;

#[derive(Debug, Default)]
struct State {
    containers: HashMap<String, Container>,
    uploads: HashMap<usize, Bytes>,
    failures: HashSet<(usize, Operation)>,
    delays: HashMap<(usize, Operation), Duration>,
    corrupted: HashSet<usize>,
    truncated: HashSet<usize>,
    calls: HashMap<Operation, usize>,
    opened: usize,
    released: HashMap<usize, usize>,
    settings: HashMap<usize, HandleSettings>,
}

/// The shared state of an in-memory storage service.
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    token: Arc<str>,
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    /// Creates an empty store that accepts requests carrying `token`.
    pub fn new(token: &str) -> Self {
        Self {
            token: token.into(),
            state: Arc::default(),
        }
    }

    /// Opens a handle for the worker with the given ordinal.
    pub fn connect(&self, index: usize) -> Result<InMemoryStorage, StorageError> {
        let delay = {
            let mut state = self.lock();
            *state.calls.entry(Operation::Connect).or_default() += 1;
            if state.failures.contains(&(index, Operation::Connect)) {
                return Err(injected(Operation::Connect));
            }
            state.opened += 1;
            state.delays.get(&(index, Operation::Connect)).copied()
        };

        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        Ok(InMemoryStorage {
            store: self.clone(),
            index,
            settings: HandleSettings::default(),
            container: None,
            object: None,
        })
    }

    /// Makes `op` fail for the given worker.
    pub fn fail(&self, index: usize, op: Operation) {
        self.lock().failures.insert((index, op));
    }

    /// Makes `op` take at least `delay` for the given worker.
    pub fn delay(&self, index: usize, op: Operation, delay: Duration) {
        self.lock().delays.insert((index, op), delay);
    }

    /// Flips a byte in the middle of every object the given worker downloads.
    pub fn corrupt_reads(&self, index: usize) {
        self.lock().corrupted.insert(index);
    }

    /// Cuts every download of the given worker to half of the object.
    pub fn truncate_reads(&self, index: usize) {
        self.lock().truncated.insert(index);
    }

    /// The contents most recently uploaded by the given worker, even if deleted since.
    pub fn last_upload(&self, index: usize) -> Option<Bytes> {
        self.lock().uploads.get(&index).cloned()
    }

    /// Names of all containers that currently exist.
    pub fn containers(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().containers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of times `op` was attempted across all handles.
    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or_default()
    }

    /// Number of handles opened so far.
    pub fn opened(&self) -> usize {
        self.lock().opened
    }

    /// Number of times the given worker's handle was released.
    pub fn released(&self, index: usize) -> usize {
        self.lock().released.get(&index).copied().unwrap_or_default()
    }

    /// The settings of the given worker's handle at the time it was released.
    pub fn settings(&self, index: usize) -> Option<HandleSettings> {
        self.lock().settings.get(&index).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

/// One worker's handle to an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryStorage {
    store: InMemoryStore,
    index: usize,
    settings: HandleSettings,
    container: Option<String>,
    object: Option<String>,
}

impl InMemoryStorage {
    /// Records the call, applies injected delays and faults, and checks credentials.
    fn enter(&self, op: Operation) -> Result<MutexGuard<'_, State>, StorageError> {
        let delay = {
            let mut state = self.store.lock();
            *state.calls.entry(op).or_default() += 1;
            state.delays.get(&(self.index, op)).copied()
        };

        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let state = self.store.lock();
        if state.failures.contains(&(self.index, op)) {
            return Err(injected(op));
        }
        if self.settings.endpoint.is_none() {
            return Err(StorageError::NotConfigured("endpoint"));
        }
        if self.settings.token.as_deref() != Some(&*self.store.token) {
            return Err(StorageError::Status {
                op: op.as_str(),
                status: 401,
            });
        }

        Ok(state)
    }

    fn container(&self) -> Result<&str, StorageError> {
        self.container
            .as_deref()
            .ok_or(StorageError::NotConfigured("container"))
    }

    fn object(&self) -> Result<(&str, &str), StorageError> {
        let object = self
            .object
            .as_deref()
            .ok_or(StorageError::NotConfigured("object"))?;
        Ok((self.container()?, object))
    }
}

impl ObjectStorage for InMemoryStorage {
    fn set_endpoint(&mut self, url: &str) -> Result<(), StorageError> {
        self.settings.endpoint = Some(url.to_owned());
        Ok(())
    }

    fn set_auth_token(&mut self, token: &str) -> Result<(), StorageError> {
        self.settings.token = Some(token.to_owned());
        Ok(())
    }

    fn set_proxy(&mut self, proxy: Option<&str>) -> Result<(), StorageError> {
        self.settings.proxy = proxy.map(str::to_owned);
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), StorageError> {
        self.settings.timeout = timeout;
        Ok(())
    }

    fn create_container(&mut self, name: &str) -> Result<(), StorageError> {
        self.container = Some(name.to_owned());
        let mut state = self.enter(Operation::CreateContainer)?;
        state.containers.entry(name.to_owned()).or_default();
        Ok(())
    }

    fn select_object(&mut self, name: &str) {
        self.object = Some(name.to_owned());
    }

    fn put(&mut self, mut source: DataSource, len: u64) -> Result<(), StorageError> {
        let (container, object) = self.object()?;
        drop(self.enter(Operation::Put)?);

        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        if data.len() as u64 != len {
            return Err(StorageError::Status {
                op: Operation::Put.as_str(),
                status: 400,
            });
        }

        let data = Bytes::from(data);
        let mut state = self.store.lock();
        let objects = state.containers.get_mut(container).ok_or(StorageError::Status {
            op: Operation::Put.as_str(),
            status: 404,
        })?;
        objects.insert(object.to_owned(), data.clone());
        state.uploads.insert(self.index, data);
        Ok(())
    }

    fn get(&mut self, sink: &mut dyn Write) -> Result<(), StorageError> {
        let (container, object) = self.object()?;
        let (mut data, corrupted, truncated) = {
            let state = self.enter(Operation::Get)?;
            let data = state
                .containers
                .get(container)
                .and_then(|objects| objects.get(object))
                .cloned()
                .ok_or(StorageError::Status {
                    op: Operation::Get.as_str(),
                    status: 404,
                })?;
            (
                data.to_vec(),
                state.corrupted.contains(&self.index),
                state.truncated.contains(&self.index),
            )
        };

        if corrupted && !data.is_empty() {
            let middle = data.len() / 2;
            data[middle] ^= 0xff;
        }
        if truncated {
            data.truncate(data.len() / 2);
        }

        for chunk in data.chunks(CHUNK_SIZE) {
            sink.write_all(chunk).map_err(StorageError::Aborted)?;
        }
        Ok(())
    }

    fn delete_object(&mut self) -> Result<(), StorageError> {
        let (container, object) = self.object()?;
        let mut state = self.enter(Operation::DeleteObject)?;
        state
            .containers
            .get_mut(container)
            .and_then(|objects| objects.remove(object))
            .map(drop)
            .ok_or(StorageError::Status {
                op: Operation::DeleteObject.as_str(),
                status: 404,
            })
    }

    fn delete_container(&mut self) -> Result<(), StorageError> {
        let container = self.container()?;
        let mut state = self.enter(Operation::DeleteContainer)?;
        let status = match state.containers.get(container).map(HashMap::is_empty) {
            None => 404,
            Some(false) => 409,
            Some(true) => {
                state.containers.remove(container);
                return Ok(());
            }
        };

        Err(StorageError::Status {
            op: Operation::DeleteContainer.as_str(),
            status,
        })
    }
}

impl Drop for InMemoryStorage {
    fn drop(&mut self) {
        // A panicking test thread may have poisoned the lock; the counters are still meaningful.
        let mut state = self
            .store
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *state.released.entry(self.index).or_default() += 1;
        state
            .settings
            .insert(self.index, std::mem::take(&mut self.settings));
    }
}

fn injected(op: Operation) -> StorageError {
    StorageError::Status {
        op: op.as_str(),
        status: 500,
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};

    use super::*;

    fn handle(store: &InMemoryStore, index: usize) -> InMemoryStorage {
        let mut storage = store.connect(index).unwrap();
        storage.set_endpoint("memory://swift/v1/AUTH_test").unwrap();
        storage.set_auth_token("token").unwrap();
        storage
    }

    fn source(data: &'static [u8]) -> DataSource {
        Box::new(Cursor::new(data))
    }

    #[test]
    fn round_trips_objects() {
        let store = InMemoryStore::new("token");
        let mut storage = handle(&store, 1);

        storage.create_container("Container 1").unwrap();
        storage.select_object("Object 1");
        storage.put(source(b"hello"), 5).unwrap();

        let mut received = Vec::new();
        storage.get(&mut received).unwrap();
        assert_eq!(received, b"hello");

        storage.delete_object().unwrap();
        storage.delete_container().unwrap();
        assert!(store.containers().is_empty());
        assert_eq!(store.last_upload(1).as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn rejects_wrong_token() {
        let store = InMemoryStore::new("token");
        let mut storage = store.connect(1).unwrap();
        storage.set_endpoint("memory://swift").unwrap();
        storage.set_auth_token("other").unwrap();

        let err = storage.create_container("Container 1").unwrap_err();
        assert!(matches!(err, StorageError::Status { status: 401, .. }));
    }

    #[test]
    fn injects_faults_per_worker() {
        let store = InMemoryStore::new("token");
        store.fail(2, Operation::CreateContainer);

        handle(&store, 1).create_container("Container 1").unwrap();
        let err = handle(&store, 2)
            .create_container("Container 2")
            .unwrap_err();
        assert!(matches!(err, StorageError::Status { status: 500, .. }));
        assert_eq!(store.calls(Operation::CreateContainer), 2);
    }

    #[test]
    fn sink_errors_abort_the_download() {
        let store = InMemoryStore::new("token");
        let mut storage = handle(&store, 1);
        storage.create_container("Container 1").unwrap();
        storage.select_object("Object 1");
        storage.put(Box::new(io::repeat(0).take(4096)), 4096).unwrap();

        struct Refuse;
        impl Write for Refuse {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::other("refused"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let err = storage.get(&mut Refuse).unwrap_err();
        assert!(matches!(err, StorageError::Aborted(_)));
    }

    #[test]
    fn counts_releases() {
        let store = InMemoryStore::new("token");
        let mut storage = handle(&store, 3);
        storage.set_timeout(Some(Duration::from_secs(5))).unwrap();
        drop(storage);

        assert_eq!(store.opened(), 1);
        assert_eq!(store.released(3), 1);
        let settings = store.settings(3).unwrap();
        assert_eq!(settings.token.as_deref(), Some("token"));
        assert_eq!(settings.timeout, Some(Duration::from_secs(5)));
    }
}
