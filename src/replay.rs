//! Feed a request log through a limiter and report each decision.
//!
//! Input is JSON lines, one request per line:
//!
//! ```text
//! {"action": "login", "headers": {"x-forwarded-for": "203.0.113.5"}, "at_ms": 0}
//! ```
//!
//! Output is one JSON [`ReplayDecision`] per accepted request.

use std::collections::HashMap;
use std::future::Future;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::identity::client_identifier;
use crate::ratelimit::{ManualClock, RateLimiter};

const LINE_BUFFER: usize = 64;

/// One request read from the log.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRequest {
    /// The guarded action
    pub action: String,
    /// Request headers, used to derive the client identifier
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request time in ms since the Unix epoch (simulated mode only)
    #[serde(default)]
    pub at_ms: Option<i64>,
}

/// The limiter's verdict on one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayDecision {
    pub action: String,
    pub identifier: String,
    pub success: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: i64,
    pub retry_after_minutes: i64,
    /// What to tell a throttled caller; absent when admitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub admitted: usize,
    pub rejected: usize,
    pub skipped: usize,
    pub evicted: usize,
}

/// Run one request through `limiter`.
pub fn decide(limiter: &RateLimiter, request: &ReplayRequest) -> Result<ReplayDecision> {
    let identifier = client_identifier(&request.headers);
    let result = limiter.check_action(&identifier, &request.action)?;
    let throttled = result.throttled(&request.action, limiter.now_ms());

    Ok(ReplayDecision {
        action: request.action.clone(),
        identifier,
        success: result.success,
        limit: result.limit,
        remaining: result.remaining,
        reset_at: result.reset_at,
        retry_after_minutes: throttled.as_ref().map_or(0, |t| t.retry_after_minutes),
        message: throttled.map(|t| t.to_string()),
    })
}

/// Drives a limiter over a request log.
///
/// In simulated mode the limiter's clock is set to each request's `at_ms`
/// and a sweep runs whenever simulated time crosses a sweep boundary. In
/// live mode the limiter keeps its own clock and sweeper.
pub struct Replayer {
    limiter: Arc<RateLimiter>,
    clock: Option<Arc<ManualClock>>,
    sweep_interval_ms: i64,
    next_sweep_at: Option<i64>,
    summary: ReplaySummary,
}

impl Replayer {
    /// Replay on simulated time.
    pub fn simulated(
        limiter: Arc<RateLimiter>,
        clock: Arc<ManualClock>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            limiter,
            clock: Some(clock),
            sweep_interval_ms: i64::try_from(sweep_interval.as_millis()).unwrap_or(i64::MAX),
            next_sweep_at: None,
            summary: ReplaySummary::default(),
        }
    }

    /// Replay on the limiter's own clock; `at_ms` is ignored.
    pub fn live(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            clock: None,
            sweep_interval_ms: 0,
            next_sweep_at: None,
            summary: ReplaySummary::default(),
        }
    }

    /// Process one input line. Returns `None` for blank or rejected lines.
    pub fn process_line(&mut self, line: &str) -> Option<ReplayDecision> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let request: ReplayRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Skipping malformed request line");
                self.summary.skipped += 1;
                return None;
            }
        };

        if let Some(clock) = self.clock.clone() {
            let Some(at_ms) = request.at_ms else {
                warn!(action = %request.action, "Skipping request without at_ms");
                self.summary.skipped += 1;
                return None;
            };
            clock.set(at_ms);
            self.maybe_sweep(at_ms);
        }

        match decide(&self.limiter, &request) {
            Ok(decision) => {
                if decision.success {
                    self.summary.admitted += 1;
                } else {
                    self.summary.rejected += 1;
                }
                Some(decision)
            }
            Err(e) => {
                warn!(error = %e, "Skipping request");
                self.summary.skipped += 1;
                None
            }
        }
    }

    fn maybe_sweep(&mut self, now_ms: i64) {
        let interval = self.sweep_interval_ms;
        if interval <= 0 {
            return;
        }
        let due = *self
            .next_sweep_at
            .get_or_insert_with(|| now_ms.saturating_add(interval));
        if now_ms >= due {
            let evicted = self.limiter.sweep();
            self.summary.evicted += evicted;
            self.next_sweep_at = Some(now_ms.saturating_add(interval));
            debug!(now_ms, evicted, "Simulated sweep");
        }
    }

    /// Counters so far.
    pub fn summary(&self) -> ReplaySummary {
        self.summary
    }

    /// Read every line from `input` and write one JSON decision per line.
    pub async fn run<R, W>(&mut self, input: R, output: &mut W) -> Result<ReplaySummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            self.emit(&line, output).await?;
        }
        output.flush().await?;
        Ok(self.summary)
    }

    /// Like [`run`](Self::run), but reads lines from a channel and returns
    /// as soon as `shutdown` completes, even if the sender is still open.
    pub async fn watch<W, F>(
        &mut self,
        mut lines: mpsc::Receiver<std::io::Result<String>>,
        output: &mut W,
        shutdown: F,
    ) -> Result<ReplaySummary>
    where
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                line = lines.recv() => match line {
                    Some(line) => self.emit(&line?, output).await?,
                    None => break,
                },
            }
        }
        output.flush().await?;
        Ok(self.summary)
    }

    async fn emit<W>(&mut self, line: &str, output: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if let Some(decision) = self.process_line(line) {
            let mut encoded = serde_json::to_vec(&decision)?;
            encoded.push(b'\n');
            output.write_all(&encoded).await?;
        }
        Ok(())
    }
}

/// Read lines from a blocking reader on a dedicated thread.
///
/// The thread is not owned by the tokio runtime, so a read that never
/// returns cannot hold up runtime shutdown. It exits at end of input or
/// once the receiver is dropped and the next line arrives.
pub fn spawn_line_reader<R>(reader: R) -> Result<mpsc::Receiver<std::io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    std::thread::Builder::new()
        .name("gatekeeper-input".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
        })?;
    Ok(rx)
}
