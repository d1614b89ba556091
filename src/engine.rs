//! Search engine adapter.
//!
//! A [`SearchEngine`] probes one block on one device and reports a
//! [`ScanResult`]. [`CommandEngine`] drives an external engine binary and
//! scrapes its line-oriented output with [`OutputParser`].

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use num_bigint::BigUint;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::metrics::KeyloomMetrics;
use crate::sched::ScanResult;

/// Width of a secret in hex digits.
pub const SECRET_HEX_WIDTH: usize = 64;

static SECRET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0x\s*([0-9A-Fa-f]+)").expect("valid regex"));
static FOUND_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Found:\s*(\d+)").expect("valid regex"));

/// Everything an engine needs to probe one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeRequest {
    pub worker: usize,
    /// Device identifier passed to the engine.
    pub device: String,
    /// Absolute start of the block.
    pub start: BigUint,
    /// Block width as a power of two.
    pub range_bits: u32,
    /// Target filter (e.g. an address prefix).
    pub target: String,
    /// File the engine writes its findings to.
    pub sink: PathBuf,
}

impl ProbeRequest {
    /// Start value as lowercase hex without prefix.
    pub fn start_hex(&self) -> String {
        format!("{:x}", self.start)
    }
}

/// One block probe on one device.
///
/// Implementations never fail: an engine that cannot run reports a miss.
/// When `cancel` fires the implementation should stop promptly; the caller
/// discards whatever it returns.
pub trait SearchEngine: Send + Sync + 'static {
    fn probe(
        &self,
        request: &ProbeRequest,
        cancel: &CancellationToken,
    ) -> impl Future<Output = ScanResult> + Send;
}

/// Classified engine output line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineEvent {
    /// Header output before the device is ready.
    Header,
    /// The device reported ready.
    DeviceReady,
    /// A match, carrying the matched text.
    Match(String),
    /// Secret for the latest match, padded to [`SECRET_HEX_WIDTH`].
    Secret(String),
    /// Summary count of matches.
    Found(u64),
    /// Anything else, including malformed marker lines.
    Other,
}

/// Incremental parser for the engine's stdout.
///
/// Markers are only recognized once the device-ready line has been seen.
#[derive(Clone, Debug, Default)]
pub struct OutputParser {
    ready: bool,
    found: u64,
    result: ScanResult,
}

impl OutputParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> LineEvent {
        let line = line.trim_end();
        if !self.ready {
            if line.starts_with("GPU:") {
                self.ready = true;
                return LineEvent::DeviceReady;
            }
            return LineEvent::Header;
        }

        if let Some(rest) = line.strip_prefix("Public Addr:") {
            let Some(text) = rest.split_whitespace().last() else {
                return LineEvent::Other;
            };
            self.result.hit = true;
            self.result.matched_text = Some(text.to_string());
            self.result.matched_secret = None;
            return LineEvent::Match(text.to_string());
        }

        if line.contains("Priv (HEX):") {
            if !self.result.hit {
                return LineEvent::Other;
            }
            return match SECRET_PATTERN.captures(line) {
                Some(caps) => {
                    let secret = format!("{:0>width$}", &caps[1], width = SECRET_HEX_WIDTH);
                    self.result.matched_secret = Some(secret.clone());
                    LineEvent::Secret(secret)
                }
                None => LineEvent::Other,
            };
        }

        if let Some(caps) = FOUND_PATTERN.captures(line) {
            return match caps[1].parse::<u64>() {
                Ok(n) => {
                    self.found = self.found.max(n);
                    if n > 0 {
                        self.result.hit = true;
                    }
                    LineEvent::Found(n)
                }
                Err(_) => LineEvent::Other,
            };
        }

        LineEvent::Other
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_hit(&self) -> bool {
        self.result.hit
    }

    /// True once a match is confirmed and nothing more is worth reading.
    pub fn should_stop(&self) -> bool {
        self.result.hit && (self.result.matched_secret.is_some() || self.found > 0)
    }

    pub fn finish(self) -> ScanResult {
        self.result
    }
}

/// Engine backed by an external binary, one process per probe.
///
/// The command line is
/// `<binary> -gpuId <device> -o <sink> -start <hex> -range <bits> [extra args] <target>`.
#[derive(Clone, Debug)]
pub struct CommandEngine {
    binary: PathBuf,
    extra_args: Vec<String>,
    grace: Duration,
    metrics: Option<Arc<KeyloomMetrics>>,
}

impl CommandEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
            grace: Duration::from_millis(crate::config::DEFAULT_GRACE_MS),
            metrics: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.binary)
            .with_extra_args(config.extra_args.clone())
            .with_grace_period(Duration::from_millis(config.grace_ms))
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Time a terminated engine gets to exit before it is killed.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<KeyloomMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn binary(&self) -> &PathBuf {
        &self.binary
    }

    /// Arguments passed to the binary for `request`.
    pub fn args(&self, request: &ProbeRequest) -> Vec<String> {
        let mut args = vec![
            "-gpuId".to_string(),
            request.device.clone(),
            "-o".to_string(),
            request.sink.display().to_string(),
            "-start".to_string(),
            request.start_hex(),
            "-range".to_string(),
            request.range_bits.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args.push(request.target.clone());
        args
    }

    async fn run(
        &self,
        request: &ProbeRequest,
        cancel: &CancellationToken,
    ) -> std::io::Result<ScanResult> {
        let mut child = Command::new(&self.binary)
            .args(self.args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout not piped"))?;
        if let Some(stderr) = child.stderr.take() {
            let worker = request.worker;
            tokio::spawn(async move {
                let mut segments = BufReader::new(stderr).split(b'\n');
                while let Ok(Some(bytes)) = segments.next_segment().await {
                    debug!(worker, "engine stderr: {}", String::from_utf8_lossy(&bytes));
                }
            });
        }

        let worker = request.worker;
        let mut parser = OutputParser::new();
        // Lines are split on raw bytes so invalid UTF-8 cannot end the read.
        let mut segments = BufReader::new(stdout).split(b'\n');
        let stopped_early = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.terminate(&mut child, worker).await;
                    return Ok(parser.finish());
                }
                segment = segments.next_segment() => match segment {
                    Ok(Some(bytes)) => {
                        let line = String::from_utf8_lossy(&bytes);
                        let line = line.trim_end_matches('\r');
                        match parser.feed(line) {
                            LineEvent::Header | LineEvent::Other => debug!(worker, "engine: {}", line),
                            LineEvent::DeviceReady => debug!(worker, "device ready: {}", line),
                            LineEvent::Match(text) => info!(worker, matched = %text, "engine match"),
                            LineEvent::Secret(_) => info!(worker, "secret captured for match"),
                            LineEvent::Found(n) => debug!(worker, found = n, "engine summary"),
                        }
                        if parser.should_stop() {
                            break true;
                        }
                    }
                    Ok(None) => break false,
                    Err(e) if parser.is_hit() => {
                        warn!(worker, error = %e, "engine output failed after a match, keeping it");
                        break true;
                    }
                    Err(e) => return Err(e),
                },
            }
        };

        if stopped_early {
            self.terminate(&mut child, worker).await;
            return Ok(parser.finish());
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(std::io::Error::other(format!("engine exited with {}", status)));
        }
        Ok(parser.finish())
    }

    /// Ask the engine to stop, then kill it after the grace period.
    async fn terminate(&self, child: &mut Child, worker: usize) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: plain kill(2) on a child we spawned and have not reaped.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        let _ = child.start_kill();

        if tokio::time::timeout(self.grace, child.wait()).await.is_err() {
            warn!(worker, grace_ms = self.grace.as_millis() as u64, "engine ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                warn!(worker, error = %e, "failed to kill engine");
            }
        }
    }
}

impl SearchEngine for CommandEngine {
    async fn probe(&self, request: &ProbeRequest, cancel: &CancellationToken) -> ScanResult {
        match self.run(request, cancel).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    worker = request.worker,
                    device = %request.device,
                    start = %request.start_hex(),
                    error = %e,
                    "engine invocation failed, counting as miss"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_engine_failure();
                }
                ScanResult::miss()
            }
        }
    }
}
