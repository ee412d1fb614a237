//! skein demo - runs a small workload on the bundled reactor
//!
//! Usage: skein-demo [--strands N] [--timeout-ms N] [--json]
//!
//! Log output is controlled by SKEIN_LOG (e.g. SKEIN_LOG=skein=trace).

use skein::kernel::{Api, Exception, Kernel, KernelConfig, KernelSnapshot, Reactor, StrandError, TimedOut, Value, coroutine};
use std::process::ExitCode;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_STRANDS: u64 = 4;
const DEFAULT_TIMEOUT_MS: u64 = 50;

#[derive(Debug)]
struct Options {
    strands: u64,
    timeout: Duration,
    json: bool,
}

fn parse_args() -> Result<Options, String> {
    let mut options = Options {
        strands: DEFAULT_STRANDS,
        timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        json: false,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--strands" => options.strands = number(&arg, args.next())?,
            "--timeout-ms" => options.timeout = Duration::from_millis(number(&arg, args.next())?),
            "--json" => options.json = true,
            "-h" | "--help" => {
                return Err("usage: skein-demo [--strands N] [--timeout-ms N] [--json]".into());
            }
            other => return Err(format!("unknown argument: {}", other)),
        }
    }
    Ok(options)
}

fn number(flag: &str, value: Option<String>) -> Result<u64, String> {
    value
        .as_deref()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| format!("{} expects a non-negative integer", flag))
}

/// A worker that naps `naps` times, yielding between naps
async fn worker(api: Api, index: u64, naps: u64) -> Result<Value, Exception> {
    for _ in 0..naps {
        api.sleep(Duration::from_millis(5 * (index + 1))).await?;
        api.cooperate().await?;
    }
    Ok(Value::new(index * naps))
}

async fn demo(api: Api, options: Options) -> Result<Value, Exception> {
    let mut workers = Vec::new();
    for index in 0..options.strands {
        let source = coroutine::from_async(move |api| worker(api, index, 3));
        workers.push(api.execute(source).await?);
    }

    // Let every worker reach its first nap before looking
    api.cooperate().await?;
    let snapshot: KernelSnapshot = api.strand().await?.kernel()?.snapshot();

    let mut total = 0;
    for strand in &workers {
        let value = api.join(strand).await?;
        total += value.get::<u64>().ok_or(StrandError::UnexpectedValue { operation: "join" })?;
    }
    info!(total, "workers finished");

    // A sleeper that outlives the deadline loses the race
    let slow = coroutine::from_async(|api| async move {
        api.sleep(Duration::from_secs(3600)).await?;
        Ok(Value::unit())
    });
    match api.timeout(options.timeout, slow).await {
        Err(e) if e.is::<TimedOut>() => info!(error = %e, "slow operation abandoned"),
        Err(e) => return Err(e),
        Ok(_) => info!("slow operation finished in time"),
    }

    Ok(Value::new(snapshot))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("SKEIN_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let options = match parse_args() {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };
    let config = match KernelConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("skein-demo: {}", e);
            return ExitCode::from(2);
        }
    };

    let json = options.json;
    let started = Instant::now();
    let kernel = Kernel::with_config(config, Rc::new(Reactor::new()));
    let result = kernel.start_strand(coroutine::from_async(move |api| demo(api, options)));

    match result {
        Ok(value) => {
            info!(elapsed = ?started.elapsed(), "demo complete");
            if let Some(snapshot) = value.downcast_ref::<KernelSnapshot>() {
                if json {
                    match serde_json::to_string_pretty(snapshot) {
                        Ok(text) => println!("{}", text),
                        Err(e) => {
                            eprintln!("skein-demo: {}", e);
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    for strand in &snapshot.strands {
                        let state = format!("{:?}", strand.state);
                        println!("{:>6}  {:<10} {}", strand.id.to_string(), state, strand.frames.join(" > "));
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("skein-demo: {}", e);
            ExitCode::FAILURE
        }
    }
}
