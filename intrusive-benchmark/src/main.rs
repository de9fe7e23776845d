use std::{
    env,
    hint::black_box,
    num::NonZeroUsize,
    process,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use getopts::Options;
use hdrhistogram::Histogram;
use intrusive::{AtomicRefCounted, IntrusivePtr};
use log::{debug, error, info};
use quanta::Clock;
use thiserror::Error;

const DEFAULT_DURATION_SECS: u64 = 5;

#[derive(Debug, Error)]
enum BenchmarkError {
    #[error("failed to parse options: {0}")]
    Options(#[from] getopts::Fail),

    #[error("invalid value for --{option}: {value:?}")]
    InvalidValue { option: &'static str, value: String },

    #[error("failed to create histogram: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),

    #[error("failed to merge histograms: {0}")]
    Merge(#[from] hdrhistogram::AdditionError),

    #[error("worker thread panicked")]
    WorkerPanicked,
}

#[derive(Debug, PartialEq)]
struct Config {
    threads: usize,
    duration: Duration,
}

struct Report {
    operations: u64,
    elapsed: Duration,
    latencies: Histogram<u64>,
}

// The object every worker clones and drops handles to.
struct Payload {
    name: String,
}

fn options() -> Options {
    let mut opts = Options::new();
    opts.optopt("t", "threads", "number of worker threads (default: available parallelism)", "N");
    opts.optopt("d", "duration", "benchmark duration in seconds (default: 5)", "SECS");
    opts.optflag("h", "help", "print this help menu");
    opts
}

fn parse_value<T: std::str::FromStr>(
    option: &'static str,
    value: Option<String>,
) -> Result<Option<T>, BenchmarkError> {
    match value {
        None => Ok(None),
        Some(value) => match value.parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(BenchmarkError::InvalidValue { option, value }),
        },
    }
}

/// Parses the command line, returning `None` if help was requested.
fn parse_config(opts: &Options, args: &[String]) -> Result<Option<Config>, BenchmarkError> {
    let matches = opts.parse(args)?;
    if matches.opt_present("h") {
        return Ok(None);
    }

    let threads = match parse_value::<usize>("threads", matches.opt_str("t"))? {
        Some(0) => {
            return Err(BenchmarkError::InvalidValue { option: "threads", value: "0".to_string() })
        }
        Some(threads) => threads,
        None => thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1),
    };
    let duration = parse_value::<u64>("duration", matches.opt_str("d"))?
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_DURATION_SECS));

    Ok(Some(Config { threads, duration }))
}

fn run(config: &Config) -> Result<Report, BenchmarkError> {
    let clock = Clock::new();
    let shared = IntrusivePtr::new(Payload { name: "contended".to_string() });
    let done = AtomicBool::new(false);

    let histograms = (0..config.threads)
        .map(|_| Histogram::<u64>::new(3))
        .collect::<Result<Vec<_>, _>>()?;

    let start = clock.now();
    let results = thread::scope(|scope| {
        let workers = histograms
            .into_iter()
            .enumerate()
            .map(|(id, mut latencies)| {
                let handle = shared.clone();
                let clock = clock.clone();
                let done = &done;
                scope.spawn(move || {
                    debug!("worker {} started, count is {}", id, handle.ref_count());
                    let mut operations = 0u64;
                    while !done.load(Ordering::Relaxed) {
                        let op_start = clock.now();
                        let copy = handle.clone();
                        black_box(&copy.name);
                        drop(copy);
                        let op_end = clock.now();

                        let nanos = u64::try_from((op_end - op_start).as_nanos()).unwrap_or(u64::MAX);
                        latencies.saturating_record(nanos);
                        operations += 1;
                    }
                    (operations, latencies)
                })
            })
            .collect::<Vec<_>>();

        thread::sleep(config.duration);
        done.store(true, Ordering::Relaxed);

        workers.into_iter().map(|worker| worker.join()).collect::<Vec<_>>()
    });
    let elapsed = clock.now() - start;

    let mut operations = 0;
    let mut merged = Histogram::<u64>::new(3)?;
    for result in results {
        let (worker_operations, latencies) = result.map_err(|_| BenchmarkError::WorkerPanicked)?;
        operations += worker_operations;
        merged.add(&latencies)?;
    }

    info!("all workers finished, '{}' has {} reference(s) left", shared.name, shared.ref_count());
    match shared.try_unwrap() {
        Ok(payload) => debug!("reclaimed payload '{}'", payload.name),
        Err(shared) => error!("payload still shared after benchmark: {:p}", shared),
    }

    Ok(Report { operations, elapsed, latencies: merged })
}

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn main() {
    pretty_env_logger::init();

    let args = env::args().collect::<Vec<_>>();
    let program = args.first().map(String::as_str).unwrap_or("intrusive-benchmark");
    let opts = options();

    let config = match parse_config(&opts, args.get(1..).unwrap_or_default()) {
        Ok(Some(config)) => config,
        Ok(None) => {
            print_usage(program, &opts);
            return;
        }
        Err(e) => {
            error!("{}", e);
            print_usage(program, &opts);
            process::exit(1);
        }
    };

    info!("running with {} thread(s) for {:?}", config.threads, config.duration);
    let report = match run(&config) {
        Ok(report) => report,
        Err(e) => {
            error!("benchmark failed: {}", e);
            process::exit(1);
        }
    };

    let secs = report.elapsed.as_secs_f64();
    let rate = if secs > 0.0 { report.operations as f64 / secs } else { 0.0 };
    info!("clone/drop pairs: {} total, {:.0} per second", report.operations, rate);
    info!(
        "latency (ns): min={} p50={} p99={} p999={} max={}",
        report.latencies.min(),
        report.latencies.value_at_quantile(0.5),
        report.latencies.value_at_quantile(0.99),
        report.latencies.value_at_quantile(0.999),
        report.latencies.max(),
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{options, parse_config, run, BenchmarkError, Config};

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_explicit_values() {
        let config = parse_config(&options(), &args(&["-t", "4", "--duration", "2"]))
            .expect("valid options")
            .expect("help not requested");
        assert_eq!(Config { threads: 4, duration: Duration::from_secs(2) }, config);
    }

    #[test]
    fn defaults_duration() {
        let config = parse_config(&options(), &args(&["--threads", "1"]))
            .expect("valid options")
            .expect("help not requested");
        assert_eq!(Duration::from_secs(5), config.duration);
        assert!(config.threads >= 1);
    }

    #[test]
    fn help_requested() {
        let config = parse_config(&options(), &args(&["-h"])).expect("valid options");
        assert!(config.is_none());
    }

    #[test]
    fn rejects_invalid_values() {
        let result = parse_config(&options(), &args(&["--threads", "many"]));
        assert!(matches!(result, Err(BenchmarkError::InvalidValue { option: "threads", .. })));

        let result = parse_config(&options(), &args(&["--threads", "0"]));
        assert!(matches!(result, Err(BenchmarkError::InvalidValue { option: "threads", .. })));

        let result = parse_config(&options(), &args(&["--bogus"]));
        assert!(matches!(result, Err(BenchmarkError::Options(_))));
    }

    #[test]
    fn short_run_completes() {
        let config = Config { threads: 2, duration: Duration::from_millis(50) };
        let report = run(&config).expect("benchmark should run");
        assert!(report.operations > 0);
        assert_eq!(report.operations, report.latencies.len());
    }
}
