use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use bytesize::ByteSize;
use swiftbench_client::{KeystoneClient, SwiftClient};

use crate::config::{Config, Overrides, secret};
use crate::payload::DataMode;
use crate::{observability, orchestrator};

/// Concurrency benchmark for OpenStack object storage.
///
/// Credentials default to the OS_AUTH_URL, OS_TENANT_NAME, OS_USERNAME, OS_PASSWORD and OS_PROXY
/// environment variables.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// URL of the identity service
    #[argh(option)]
    auth_url: Option<String>,

    /// tenant to authenticate against
    #[argh(option)]
    tenant: Option<String>,

    /// user to authenticate as
    #[argh(option)]
    username: Option<String>,

    /// password of the user
    #[argh(option)]
    password: Option<String>,

    /// proxy for all requests
    #[argh(option)]
    proxy: Option<String>,

    /// number of concurrent workers
    #[argh(option, short = 'n')]
    threads: Option<usize>,

    /// number of puts and gets per worker
    #[argh(option, short = 'i')]
    iterations: Option<usize>,

    /// object size, such as `4096` or `1 MiB`
    #[argh(option, short = 's', from_str_fn(parse_size))]
    size: Option<u64>,

    /// object contents: `simple-text`, `zeroes` or `random`
    #[argh(option, short = 'm')]
    mode: Option<DataMode>,

    /// verify downloaded data against uploaded data
    #[argh(switch)]
    verify: bool,

    /// enable debug output
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// upper bound for every request, such as `30s`
    #[argh(option, from_str_fn(parse_timeout))]
    timeout: Option<Duration>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            auth_url: self.auth_url.clone(),
            tenant_name: self.tenant.clone(),
            username: self.username.clone(),
            password: self.password.as_deref().map(secret),
            proxy: self.proxy.clone(),
            threads: self.threads,
            iterations: self.iterations,
            object_size: self.size,
            data_mode: self.mode,
            verify_data: self.verify.then_some(true),
            debug: self.verbose.then_some(true),
            request_timeout: self.timeout,
        }
    }
}

fn parse_size(value: &str) -> Result<u64, String> {
    value.parse::<ByteSize>().map(|size| size.as_u64())
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|err| err.to_string())
}

/// Runs a benchmark from command line arguments.
///
/// Returns whether every worker succeeded.
pub fn execute() -> Result<bool> {
    let args: Args = argh::from_env();

    let config = Config::load(args.config.as_deref(), &args.overrides())
        .context("failed to load configuration")?;
    observability::initialize_tracing(&config.logging, config.debug);
    tracing::debug!(?config);

    let benchmark = config.benchmark().context("invalid configuration")?;
    let mut identity = KeystoneClient::new().with_timeout(benchmark.request_timeout);
    let report = orchestrator::run(&benchmark, &mut identity, |_| SwiftClient::new())?;

    report.print().context("failed to print report")?;
    Ok(report.success())
}
