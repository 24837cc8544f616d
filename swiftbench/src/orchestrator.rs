//! Drives a complete benchmark run.
//!
//! A run authenticates once, spawns one OS thread per worker, releases the
//! [`StartBarrier`] as soon as every worker has arrived, and joins all workers before reading
//! their results.

use std::any::Any;
use std::io;
use std::thread::{self, ScopedJoinHandle};

use swiftbench_client::{IdentityError, IdentityService, ObjectStorage, StorageError};

use crate::auth;
use crate::barrier::{Release, StartBarrier};
use crate::config::BenchmarkConfig;
use crate::payload::Payload;
use crate::report::RunReport;
use crate::worker::{Generate, Worker, WorkerError, WorkerResult};

/// Errors that abort a run without a report.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    /// The identity service did not provide a token and storage endpoint.
    #[error("authentication failed")]
    Auth(#[source] IdentityError),
    /// A worker thread could not be created.
    #[error("failed to spawn worker {index}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },
    /// A worker hit an environment failure that invalidates the whole run.
    #[error("worker {index} failed irrecoverably")]
    Worker {
        index: usize,
        #[source]
        source: WorkerError,
    },
}

/// Runs the benchmark described by `config`.
///
/// `connect` opens a private storage handle for the worker with the given ordinal; it is called
/// once on each worker's thread. Worker failures are recorded in the returned report. Only fatal
/// failures are returned as errors.
pub fn run<I, S, F>(
    config: &BenchmarkConfig,
    identity: &mut I,
    connect: F,
) -> Result<RunReport, FatalError>
where
    I: IdentityService + ?Sized,
    S: ObjectStorage,
    F: Fn(usize) -> Result<S, StorageError> + Sync,
{
    run_with(config, identity, connect, Payload::generate)
}

fn run_with<I, S, F>(
    config: &BenchmarkConfig,
    identity: &mut I,
    connect: F,
    generate: Generate,
) -> Result<RunReport, FatalError>
where
    I: IdentityService + ?Sized,
    S: ObjectStorage,
    F: Fn(usize) -> Result<S, StorageError> + Sync,
{
    let auth = auth::authenticate(identity, config).map_err(FatalError::Auth)?;

    let threads = config.threads.get();
    let barrier = StartBarrier::new(threads);
    tracing::info!(
        threads,
        iterations = config.iterations.get(),
        object_size = config.object_size,
        data_mode = %config.data_mode,
        verify = config.verify_data,
        "starting workers"
    );

    let (release, mut results) = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(threads);

        for index in 1..=threads {
            // Issued before spawning: if spawning fails, dropping the closure drops the ticket.
            let ticket = barrier.ticket();
            let worker = Worker::new(index, config, &auth, &barrier).with_generator(generate);
            let connect = &connect;

            let spawned = thread::Builder::new()
                .name(format!("worker-{index}"))
                .spawn_scoped(scope, move || worker.run(connect, ticket));

            match spawned {
                Ok(handle) => handles.push((index, handle)),
                Err(source) => {
                    barrier.abort();
                    join_all(handles);
                    return Err(FatalError::Spawn { index, source });
                }
            }
        }

        let arrivals = barrier.wait_for_arrivals();
        let release = barrier.release();
        tracing::debug!(
            waiting = arrivals.waiting,
            passed = arrivals.passed,
            "released workers"
        );

        Ok((release, join_all(handles)))
    })?;

    if let Some(position) = results.iter().position(WorkerResult::is_fatal) {
        if let WorkerResult {
            index,
            status: Err(source),
            ..
        } = results.swap_remove(position)
        {
            return Err(FatalError::Worker { index, source });
        }
    }

    let report = RunReport {
        released_at: match release {
            Release::Go(instant) => Some(instant),
            Release::Aborted => None,
        },
        results,
        phase_bytes: config
            .object_size
            .saturating_mul(config.iterations.get() as u64),
    };

    tracing::info!(
        workers = report.results.len(),
        failures = report.failures(),
        "run finished"
    );
    Ok(report)
}

/// Joins every worker, turning panics into failed results.
fn join_all(handles: Vec<(usize, ScopedJoinHandle<'_, WorkerResult>)>) -> Vec<WorkerResult> {
    handles
        .into_iter()
        .map(|(index, handle)| {
            handle
                .join()
                .unwrap_or_else(|panic| WorkerResult::panicked(index, panic_message(&*panic)))
        })
        .collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use swiftbench_test::identity::StaticIdentity;
    use swiftbench_test::storage::{InMemoryStore, Operation};

    use super::*;
    use crate::payload::{DataMode, PayloadError};

    const TOKEN: &str = "tk-orchestrator";

    /// Generates payloads normally, except that worker 2 finds no entropy.
    fn starved_second_worker(
        index: usize,
        mode: DataMode,
        len: u64,
    ) -> Result<Payload, PayloadError> {
        if index == 2 {
            return Err(PayloadError::Entropy(Box::new(io::Error::other(
                "entropy source unavailable",
            ))));
        }
        Payload::generate(index, mode, len)
    }

    #[test]
    fn entropy_failure_fails_the_run() {
        swiftbench_test::tracing::init();
        let mut config = BenchmarkConfig::new("http://identity", "bench", "swift", "secret");
        config.threads = NonZeroUsize::new(4).unwrap();
        config.data_mode = DataMode::PseudoRandom;
        let store = InMemoryStore::new(TOKEN);
        let mut identity = StaticIdentity::new(TOKEN, "memory://swift/v1/AUTH_bench");

        let result = run_with(
            &config,
            &mut identity,
            |index| store.connect(index),
            starved_second_worker,
        );

        let Err(FatalError::Worker { index, source }) = result else {
            panic!("expected a fatal worker error, got {result:?}");
        };
        assert_eq!(index, 2);
        assert!(source.is_fatal());

        // siblings were held at the barrier and never started timing
        assert_eq!(store.calls(Operation::Put), 0);
        assert_eq!(store.calls(Operation::Get), 0);
        assert!(store.containers().is_empty());
        for sibling in [1, 3, 4] {
            assert_eq!(store.released(sibling), 1, "worker {sibling}");
        }
        assert_eq!(store.released(2), 0);
    }

    #[test]
    fn extracts_panic_messages() {
        let panic = thread::spawn(|| panic!("static message")).join().unwrap_err();
        assert_eq!(panic_message(&*panic), "static message");

        let index = 3;
        let panic = thread::spawn(move || panic!("worker {index}")).join().unwrap_err();
        assert_eq!(panic_message(&*panic), "worker 3");
    }
}
