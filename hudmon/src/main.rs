//! Entry point for the hudmon viewer. Parses args and follows an agent's stream.

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hudmon::history::{Applied, Timeline};
use hudmon::ws::{backoff, connect, next_message};

const DEFAULT_URL: &str = "ws://127.0.0.1:5000/ws";
const DEFAULT_POINTS: usize = 3600;

#[derive(Debug, PartialEq)]
struct ParsedArgs {
    url: String,
    points: usize,
    once: bool,
}

fn usage(prog: &str) -> String {
    format!("Usage: {prog} [--points N|-n N] [--once] [ws://HOST:PORT/ws[?token=TOKEN]]")
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "hudmon".into());
    let mut url: Option<String> = None;
    let mut points = DEFAULT_POINTS;
    let mut once = false;

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(usage(&prog)),
            "--points" | "-n" => {
                if let Some(n) = it.next().and_then(|v| v.parse().ok()) {
                    points = n;
                }
            }
            "--once" => once = true,
            _ if arg.starts_with("--points=") => {
                if let Some(n) = arg.split_once('=').and_then(|(_, v)| v.parse().ok()) {
                    points = n;
                }
            }
            _ => {
                if url.is_none() {
                    url = Some(arg);
                } else {
                    return Err(format!("Unexpected argument. {}", usage(&prog)));
                }
            }
        }
    }
    Ok(ParsedArgs {
        url: url.unwrap_or_else(|| DEFAULT_URL.to_string()),
        points,
        once,
    })
}

enum SessionEnd {
    /// `--once` got its update.
    Done,
    /// The agent went away; try again.
    Dropped,
}

async fn follow(url: &str, timeline: &mut Timeline, once: bool, attempt: &mut u32) -> anyhow::Result<SessionEnd> {
    let mut ws = connect(url).await.with_context(|| format!("connecting to {url}"))?;
    info!(%url, "connected");
    *attempt = 0;

    while let Some(msg) = next_message(&mut ws).await? {
        match timeline.apply(msg) {
            Applied::Backlog(n) => info!(points = n, "received backlog"),
            Applied::Live => {
                if let Some(s) = timeline.latest() {
                    println!("{}", s.summary_line());
                }
                if once {
                    return Ok(SessionEnd::Done);
                }
            }
            Applied::Error(message) => eprintln!("agent error: {message}"),
            Applied::Ignored => {}
        }
    }
    Ok(SessionEnd::Dropped)
}

enum Next {
    Exit(anyhow::Result<()>),
    Reconnect,
}

// `--once` never reconnects: it either printed its update or failed.
fn next_step(ended: anyhow::Result<SessionEnd>, once: bool) -> Next {
    match ended {
        Ok(SessionEnd::Done) => Next::Exit(Ok(())),
        Ok(SessionEnd::Dropped) if once => Next::Exit(Err(anyhow!(
            "agent closed the stream before sending an update"
        ))),
        Err(e) if once => Next::Exit(Err(e)),
        Ok(SessionEnd::Dropped) => {
            warn!("disconnected");
            Next::Reconnect
        }
        Err(e) => {
            warn!(error = %format!("{e:#}"), "disconnected");
            Next::Reconnect
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            return Ok(());
        }
    };

    let mut timeline = Timeline::new(parsed.points);
    let mut attempt = 0u32;
    loop {
        let ended = follow(&parsed.url, &mut timeline, parsed.once, &mut attempt).await;
        if let Next::Exit(result) = next_step(ended, parsed.once) {
            return result;
        }

        let delay: Duration = backoff(attempt);
        attempt = attempt.saturating_add(1);
        info!(delay_ms = delay.as_millis() as u64, attempt, "reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
