//! Aggregated results of a benchmark run.

use std::error::Error;
use std::fmt;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use bytesize::ByteSize;
use sketches_ddsketch::DDSketch;
use yansi::Paint;

use crate::worker::{Timestamps, WorkerResult};

/// Results of every joined worker, in worker order.
#[derive(Debug)]
pub struct RunReport {
    /// The instant the start barrier was released.
    pub released_at: Option<Instant>,
    /// One result per worker.
    pub results: Vec<WorkerResult>,
    /// Bytes each worker moves in one phase: object size times iterations.
    pub phase_bytes: u64,
}

impl RunReport {
    /// Returns `true` if every worker succeeded.
    pub fn success(&self) -> bool {
        self.results.iter().all(WorkerResult::is_success)
    }

    /// Number of failed workers.
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }

    /// Delay between the barrier release and the last worker starting its put phase.
    pub fn start_skew(&self) -> Option<Duration> {
        let released_at = self.released_at?;
        self.results
            .iter()
            .filter_map(|r| r.timestamps.put_start)
            .max()
            .map(|latest| latest.duration_since(released_at))
    }

    /// Prints the report to stdout.
    pub fn print(&self) -> io::Result<()> {
        self.write_to(&mut io::stdout().lock())
    }

    /// Writes a line per worker followed by a summary.
    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "{}", "## WORKERS".bold())?;
        for result in &self.results {
            let status = match &result.status {
                Ok(()) => "OK".green().bold().to_string(),
                Err(_) => "FAILED".red().bold().to_string(),
            };
            let ts = &result.timestamps;
            write!(
                out,
                "  worker {:>4}  {status:<6}  put: {}  get: {}  total: {}",
                result.index,
                Elapsed(ts.put_duration()),
                Elapsed(ts.get_duration()),
                Elapsed(ts.total_duration()),
            )?;
            if let Err(error) = &result.status {
                write!(out, "  ({})", ErrorChain(error))?;
            }
            writeln!(out)?;
        }

        writeln!(out)?;
        writeln!(out, "{}", "## TOTALS".bold())?;
        self.write_phase(out, "PUT:", |ts| (ts.put_start, ts.put_end))?;
        self.write_phase(out, "GET:", |ts| (ts.get_start, ts.get_end))?;

        if let Some(skew) = self.start_skew() {
            writeln!(out, "  start skew: {:.2?}", skew.bold())?;
        }

        let failures = self.failures();
        if failures > 0 {
            let message = format!("{failures} of {} workers FAILED", self.results.len());
            writeln!(out, "{}", message.bold().red())?;
        } else {
            let message = format!("all {} workers succeeded", self.results.len());
            writeln!(out, "{}", message.bold().green())?;
        }

        Ok(())
    }

    fn write_phase(
        &self,
        out: &mut impl Write,
        label: &str,
        phase: impl Fn(&Timestamps) -> (Option<Instant>, Option<Instant>),
    ) -> io::Result<()> {
        let mut timing = DDSketch::default();
        let mut first_start = None::<Instant>;
        let mut last_end = None::<Instant>;

        for result in &self.results {
            let (Some(start), Some(end)) = phase(&result.timestamps) else {
                continue;
            };
            timing.add(end.duration_since(start).as_secs_f64());
            first_start = Some(first_start.map_or(start, |first| first.min(start)));
            last_end = Some(last_end.map_or(end, |last| last.max(end)));
        }

        let completed = timing.count();
        writeln!(
            out,
            "{} ({} of {} workers completed)",
            label.bold().green(),
            completed.bold(),
            self.results.len()
        )?;

        if let (Some(start), Some(end)) = (first_start, last_end) {
            let wall = end.duration_since(start);
            let bytes = self.phase_bytes.saturating_mul(completed as u64);
            if !wall.is_zero() {
                let throughput = (bytes as f64 / wall.as_secs_f64()) as u64;
                writeln!(out, "  {:.2}/s", ByteSize::b(throughput).bold())?;
            }
        }

        if let Some(percentiles) = Percentiles::of(&timing) {
            writeln!(
                out,
                "  avg: {:.2?}; p50: {:.2?}; p90: {:.2?}; p99: {:.2?}",
                percentiles.avg.bold(),
                percentiles.p50,
                percentiles.p90,
                percentiles.p99
            )?;
        }

        Ok(())
    }
}

struct Percentiles {
    avg: Duration,
    p50: Duration,
    p90: Duration,
    p99: Duration,
}

impl Percentiles {
    fn of(sketch: &DDSketch) -> Option<Self> {
        let count = sketch.count();
        if count == 0 {
            return None;
        }

        let quantile = |q| sketch.quantile(q).ok().flatten().map(Duration::from_secs_f64);
        Some(Self {
            avg: Duration::from_secs_f64(sketch.sum()? / count as f64),
            p50: quantile(0.5)?,
            p90: quantile(0.9)?,
            p99: quantile(0.99)?,
        })
    }
}

/// Formats an optional duration, or `-` if it was never measured.
struct Elapsed(Option<Duration>);

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(duration) => write!(f, "{duration:>9.2?}"),
            None => write!(f, "{:>9}", "-"),
        }
    }
}

/// Formats an error followed by all of its sources.
struct ErrorChain<'a>(&'a dyn Error);

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }
        Ok(())
    }
}
