//! A single benchmark worker.
//!
//! Each worker runs on its own thread and walks through a fixed sequence of steps:
//!
//! 1. generate its payload and open its storage handle,
//! 2. create its container and select its object,
//! 3. wait at the [`StartBarrier`](crate::barrier::StartBarrier),
//! 4. upload the object `iterations` times (put phase),
//! 5. download the object `iterations` times (get phase),
//! 6. delete the object and the container.
//!
//! The first failing step ends the sequence. Whatever was created is still cleaned up on a best
//! effort basis, and the storage handle is released before the worker returns.

use std::error::Error;
use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use swiftbench_client::{ObjectStorage, StorageError};

use crate::auth::AuthResult;
use crate::barrier::{Release, StartBarrier, Ticket};
use crate::config::BenchmarkConfig;
use crate::payload::{DataMode, Payload, PayloadError};

/// Produces the payload a worker uploads, from its ordinal, data mode and object size.
pub type Generate = fn(usize, DataMode, u64) -> Result<Payload, PayloadError>;

/// Name of the container owned by the worker with the given ordinal.
pub fn container_name(index: usize) -> String {
    format!("Container {index}")
}

/// Name of the object owned by the worker with the given ordinal.
pub fn object_name(index: usize) -> String {
    format!("Object {index}")
}

/// A storage step of the worker protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Connect,
    Configure,
    CreateContainer,
    Put,
    Get,
    DeleteObject,
    DeleteContainer,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Op::Connect => "connect",
            Op::Configure => "configure",
            Op::CreateContainer => "create container",
            Op::Put => "put",
            Op::Get => "get",
            Op::DeleteObject => "delete object",
            Op::DeleteContainer => "delete container",
        })
    }
}

/// Reasons a worker did not complete its protocol.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// A storage operation failed.
    #[error("{op} failed")]
    Storage {
        op: Op,
        #[source]
        source: StorageError,
    },
    /// The payload could not be generated.
    #[error("failed to generate payload")]
    Payload(#[source] PayloadError),
    /// Downloaded data did not match the uploaded data.
    #[error("downloaded data failed verification")]
    Verify(#[source] PayloadError),
    /// The run was aborted before the barrier was released.
    #[error("run aborted before start")]
    Aborted,
    /// The worker thread panicked.
    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl WorkerError {
    fn storage(op: Op) -> impl FnOnce(StorageError) -> Self {
        move |source| WorkerError::Storage { op, source }
    }

    /// Returns `true` for environment failures that must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::Payload(PayloadError::Entropy(_)))
    }
}

/// Phase boundaries of one worker, read from the monotonic clock.
///
/// Boundaries the worker never reached are `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timestamps {
    pub start: Option<Instant>,
    pub put_start: Option<Instant>,
    pub put_end: Option<Instant>,
    pub get_start: Option<Instant>,
    pub get_end: Option<Instant>,
    pub end: Option<Instant>,
}

impl Timestamps {
    pub fn put_duration(&self) -> Option<Duration> {
        between(self.put_start, self.put_end)
    }

    pub fn get_duration(&self) -> Option<Duration> {
        between(self.get_start, self.get_end)
    }

    pub fn total_duration(&self) -> Option<Duration> {
        between(self.start, self.end)
    }
}

fn between(from: Option<Instant>, to: Option<Instant>) -> Option<Duration> {
    Some(to?.duration_since(from?))
}

/// Outcome of one worker, read by the orchestrator after joining the worker's thread.
#[derive(Debug)]
pub struct WorkerResult {
    /// Ordinal of the worker, starting at 1.
    pub index: usize,
    pub status: Result<(), WorkerError>,
    pub timestamps: Timestamps,
}

impl WorkerResult {
    /// Creates the result of a worker whose thread panicked.
    pub fn panicked(index: usize, message: String) -> Self {
        Self {
            index,
            status: Err(WorkerError::Panicked(message)),
            timestamps: Timestamps::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_ok()
    }

    pub fn is_fatal(&self) -> bool {
        self.status.as_ref().is_err_and(WorkerError::is_fatal)
    }
}

/// Tracks what a worker created, so that cleanup only touches those resources.
#[derive(Debug, Default)]
struct Created {
    container: bool,
    object: bool,
}

/// One worker's view of the run.
///
/// Configuration and credentials are shared read-only by all workers.
#[derive(Debug)]
pub struct Worker<'a> {
    index: usize,
    config: &'a BenchmarkConfig,
    auth: &'a AuthResult,
    barrier: &'a StartBarrier,
    generate: Generate,
}

impl<'a> Worker<'a> {
    pub fn new(
        index: usize,
        config: &'a BenchmarkConfig,
        auth: &'a AuthResult,
        barrier: &'a StartBarrier,
    ) -> Self {
        Self {
            index,
            config,
            auth,
            barrier,
            generate: Payload::generate,
        }
    }

    /// Replaces the payload generator, which defaults to [`Payload::generate`].
    pub fn with_generator(mut self, generate: Generate) -> Self {
        self.generate = generate;
        self
    }

    /// Runs the worker protocol to completion.
    ///
    /// `connect` opens the worker's private storage handle. `ticket` must have been issued by this
    /// worker's barrier and is consumed on every path, so the barrier never waits for this worker
    /// in vain.
    pub fn run<S, F>(self, connect: F, ticket: Ticket<'_>) -> WorkerResult
    where
        S: ObjectStorage,
        F: FnOnce(usize) -> Result<S, StorageError>,
    {
        let span = tracing::debug_span!("worker", worker = self.index);
        let _guard = span.enter();

        let mut timestamps = Timestamps {
            start: Some(Instant::now()),
            ..Default::default()
        };

        let status = self.execute(connect, ticket, &mut timestamps);
        match &status {
            Ok(()) => {
                timestamps.end = Some(Instant::now());
                tracing::debug!("worker finished");
            }
            Err(error) => {
                tracing::warn!(error = error as &dyn Error, "worker failed");
            }
        }

        WorkerResult {
            index: self.index,
            status,
            timestamps,
        }
    }

    fn execute<S, F>(
        &self,
        connect: F,
        ticket: Ticket<'_>,
        timestamps: &mut Timestamps,
    ) -> Result<(), WorkerError>
    where
        S: ObjectStorage,
        F: FnOnce(usize) -> Result<S, StorageError>,
    {
        let payload = (self.generate)(self.index, self.config.data_mode, self.config.object_size)
            .map_err(WorkerError::Payload)
            .inspect_err(|error| {
                if error.is_fatal() {
                    self.barrier.abort();
                }
            })?;

        let mut storage = connect(self.index).map_err(WorkerError::storage(Op::Connect))?;
        let mut created = Created::default();

        let outcome = self.protocol(&mut storage, &payload, ticket, timestamps, &mut created);
        let cleanup = self.cleanup(&mut storage, &created);
        drop(storage);

        match (outcome, cleanup) {
            (Ok(()), cleanup) => cleanup,
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(cleanup)) => {
                tracing::warn!(error = &cleanup as &dyn Error, "cleanup after failure failed");
                Err(error)
            }
        }
    }

    fn protocol(
        &self,
        storage: &mut impl ObjectStorage,
        payload: &Payload,
        ticket: Ticket<'_>,
        timestamps: &mut Timestamps,
        created: &mut Created,
    ) -> Result<(), WorkerError> {
        let iterations = self.config.iterations.get();

        self.configure(storage)
            .map_err(WorkerError::storage(Op::Configure))?;

        let container = container_name(self.index);
        tracing::debug!(%container, "creating container");
        storage
            .create_container(&container)
            .map_err(WorkerError::storage(Op::CreateContainer))?;
        created.container = true;
        storage.select_object(&object_name(self.index));

        tracing::debug!("waiting for start");
        if ticket.wait() == Release::Aborted {
            return Err(WorkerError::Aborted);
        }

        timestamps.put_start = Some(Instant::now());
        for iteration in 0..iterations {
            tracing::trace!(iteration, "put");
            created.object = true;
            storage
                .put(payload.source(), payload.len())
                .map_err(WorkerError::storage(Op::Put))?;
        }
        timestamps.put_end = Some(Instant::now());
        tracing::debug!("put phase done");

        timestamps.get_start = Some(Instant::now());
        for iteration in 0..iterations {
            tracing::trace!(iteration, "get");
            if self.config.verify_data {
                verified_get(storage, payload)?;
            } else {
                storage
                    .get(&mut io::sink())
                    .map_err(WorkerError::storage(Op::Get))?;
            }
        }
        timestamps.get_end = Some(Instant::now());
        tracing::debug!("get phase done");

        Ok(())
    }

    fn configure(&self, storage: &mut impl ObjectStorage) -> Result<(), StorageError> {
        storage.set_proxy(self.config.proxy.as_deref())?;
        storage.set_timeout(self.config.request_timeout)?;
        storage.set_auth_token(self.auth.token())?;
        storage.set_endpoint(self.auth.storage_url())
    }

    /// Deletes whatever the protocol created and returns the first failure.
    fn cleanup(
        &self,
        storage: &mut impl ObjectStorage,
        created: &Created,
    ) -> Result<(), WorkerError> {
        let mut result = Ok(());

        if created.object {
            result = storage
                .delete_object()
                .map_err(WorkerError::storage(Op::DeleteObject));
        }

        if created.container {
            let deleted = storage
                .delete_container()
                .map_err(WorkerError::storage(Op::DeleteContainer));
            match (&result, deleted) {
                (Ok(()), deleted) => result = deleted,
                (Err(_), Err(error)) => {
                    tracing::warn!(error = &error as &dyn Error, "delete container failed");
                }
                (Err(_), Ok(())) => {}
            }
        }

        result
    }
}

/// Downloads the object through a fresh verifier.
fn verified_get(storage: &mut impl ObjectStorage, payload: &Payload) -> Result<(), WorkerError> {
    let mut verifier = payload.verifier();
    match storage.get(&mut verifier) {
        Ok(()) => verifier.finish().map_err(WorkerError::Verify),
        // A rejected chunk aborts the download; report the mismatch rather than the abort.
        Err(source) => Err(match verifier.into_failure() {
            Some(failure) => WorkerError::Verify(failure),
            None => WorkerError::Storage { op: Op::Get, source },
        }),
    }
}
