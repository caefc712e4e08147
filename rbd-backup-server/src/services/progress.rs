//! Percentage sampling from an external tool's diagnostic stream.
//!
//! `rbd` redraws a line such as `Exporting image: 45% complete...` on stderr
//! while it works. The sampler polls that stream on a fixed interval, takes
//! the first run of digits in whatever chunk is available, and reports it
//! when it beats the highest value seen so far.

use futures_util::FutureExt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Largest chunk taken from the stream per poll.
pub const READ_CHUNK: usize = 1024;

/// Receives percentage updates. Values arrive strictly increasing.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, percent: u8);
}

impl<F> ProgressSink for F
where
    F: Fn(u8) + Send + Sync,
{
    fn on_progress(&self, percent: u8) {
        self(percent)
    }
}

impl ProgressSink for mpsc::UnboundedSender<u8> {
    fn on_progress(&self, percent: u8) {
        // Receiver gone means nobody is recording this job any more
        let _ = self.send(percent);
    }
}

/// Why the sampler is being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The process exited (successfully or not); completion is reported.
    Exited,
    /// The operation was aborted; no synthetic completion.
    Cancelled,
}

/// Final state of a sampler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerReport {
    pub highest: u8,
    /// Last non-empty chunk read from the stream, trimmed.
    pub tail: String,
}

/// First run of ASCII digits in `chunk`, if it fits in a u32.
pub fn first_number(chunk: &[u8]) -> Option<u32> {
    let start = chunk.iter().position(u8::is_ascii_digit)?;
    let len = chunk[start..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    std::str::from_utf8(&chunk[start..start + len])
        .ok()?
        .parse()
        .ok()
}

pub struct ProgressSampler<R> {
    reader: R,
    interval: Duration,
    highest: u8,
    tail: String,
}

impl<R> ProgressSampler<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            interval: SAMPLE_INTERVAL,
            highest: 0,
            tail: String::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn highest(&self) -> u8 {
        self.highest
    }

    /// Feeds one chunk. Returns the new maximum when the chunk's first number
    /// is a percentage above the current one.
    pub fn observe(&mut self, chunk: &[u8]) -> Option<u8> {
        let text = String::from_utf8_lossy(chunk);
        let text = text.trim();
        if !text.is_empty() {
            self.tail = text.to_string();
        }

        let value = first_number(chunk)?;
        if value > 100 {
            return None;
        }
        let percent = value as u8;
        if percent > self.highest {
            self.highest = percent;
            Some(percent)
        } else {
            None
        }
    }

    /// Polls until `stop` fires. Each tick takes whatever the stream holds
    /// right now and never waits for more; end-of-file is not a stop
    /// condition. A dropped `stop` sender counts as [`StopReason::Exited`].
    pub async fn run<S: ProgressSink>(
        mut self,
        sink: S,
        mut stop: oneshot::Receiver<StopReason>,
    ) -> SamplerReport {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = [0u8; READ_CHUNK];

        loop {
            tokio::select! {
                reason = &mut stop => {
                    let reason = reason.unwrap_or(StopReason::Exited);
                    if reason == StopReason::Exited && self.highest < 100 {
                        self.highest = 100;
                        sink.on_progress(100);
                    }
                    return SamplerReport {
                        highest: self.highest,
                        tail: self.tail,
                    };
                }
                _ = ticker.tick() => {
                    let n = match self.reader.read(&mut buf).now_or_never() {
                        Some(Ok(n)) => n,
                        // Nothing buffered yet, or a read error: try next tick
                        _ => continue,
                    };
                    if let Some(percent) = self.observe(&buf[..n]) {
                        sink.on_progress(percent);
                    }
                }
            }
        }
    }
}
