//! Agent configuration from flags, environment, then defaults.

use std::time::Duration;

use crate::gpu::DEFAULT_VENDOR_TIMEOUT;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_HISTORY_LEN: usize = 3600;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub port: u16,
    /// History ring capacity, in snapshots.
    pub history_len: usize,
    pub interval: Duration,
    pub gpu_enabled: bool,
    pub gpu_timeout: Duration,
    /// When set, `/ws` requires `?token=<value>`.
    pub auth_token: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            history_len: DEFAULT_HISTORY_LEN,
            interval: DEFAULT_INTERVAL,
            gpu_enabled: true,
            gpu_timeout: DEFAULT_VENDOR_TIMEOUT,
            auth_token: None,
        }
    }
}

pub fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--port PORT|-p PORT] [--history N|-H N] [--interval-ms MS|-i MS] [--token TOKEN] [--no-gpu]\n\
         Environment: HUDMON_PORT, HUDMON_HISTORY_LENGTH, HUDMON_INTERVAL_MS, HUDMON_TOKEN, HUDMON_GPU=0, HUDMON_GPU_TIMEOUT_MS"
    )
}

#[derive(Default)]
struct Flags {
    port: Option<String>,
    history: Option<String>,
    interval_ms: Option<String>,
    token: Option<String>,
    no_gpu: bool,
}

fn parse_flags<I: IntoIterator<Item = String>>(args: I) -> Result<Flags, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "hudmon_agent".into());
    let mut f = Flags::default();
    while let Some(a) = it.next() {
        match a.as_str() {
            "-h" | "--help" => return Err(usage(&prog)),
            "--port" | "-p" => f.port = it.next(),
            "--history" | "-H" => f.history = it.next(),
            "--interval-ms" | "-i" => f.interval_ms = it.next(),
            "--token" => f.token = it.next(),
            "--no-gpu" => f.no_gpu = true,
            _ => {
                if let Some((k, v)) = a.split_once('=') {
                    let v = Some(v.to_string());
                    match k {
                        "--port" => f.port = v,
                        "--history" => f.history = v,
                        "--interval-ms" => f.interval_ms = v,
                        "--token" => f.token = v,
                        _ => {}
                    }
                }
            }
        }
    }
    Ok(f)
}

fn first_parsed<T: std::str::FromStr>(candidates: [Option<String>; 2]) -> Option<T> {
    candidates
        .into_iter()
        .flatten()
        .find_map(|s| s.trim().parse::<T>().ok())
}

impl AgentConfig {
    /// Resolve from the process arguments and environment.
    /// `Err` carries the usage text for `--help`.
    pub fn from_env_and_args() -> Result<Self, String> {
        Self::resolve(std::env::args(), |k| std::env::var(k).ok())
    }

    /// Flags win over environment, environment over defaults. Values that do
    /// not parse are skipped in favour of the next source.
    pub fn resolve<I, E>(args: I, env: E) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
        E: Fn(&str) -> Option<String>,
    {
        let flags = parse_flags(args)?;
        let d = Self::default();

        let port = first_parsed::<u16>([flags.port, env("HUDMON_PORT")]).unwrap_or(d.port);
        let history_len = first_parsed::<usize>([flags.history, env("HUDMON_HISTORY_LENGTH")])
            .unwrap_or(d.history_len);
        let interval = first_parsed::<u64>([flags.interval_ms, env("HUDMON_INTERVAL_MS")])
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(d.interval);
        let gpu_timeout = first_parsed::<u64>([None, env("HUDMON_GPU_TIMEOUT_MS")])
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(d.gpu_timeout);
        let gpu_enabled =
            !flags.no_gpu && env("HUDMON_GPU").map(|v| v != "0").unwrap_or(d.gpu_enabled);
        let auth_token = flags
            .token
            .or_else(|| env("HUDMON_TOKEN"))
            .filter(|t| !t.is_empty());

        Ok(Self {
            port,
            history_len,
            interval,
            gpu_enabled,
            gpu_timeout,
            auth_token,
        })
    }
}
