//! Packet Pacer
//!
//! Releases fixed-size frames to a sink on a fixed cadence. Frame `i` is due at
//! `start + i * interval`; deadlines always come from the original schedule,
//! so a slow tick never pushes later frames back.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

use super::config::VosConfig;
use super::VosError;

/// Destination for paced frames
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, frame: &[u8]) -> Result<(), VosError>;
}

/// Outcome of a completed pacing job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PacingReport {
    pub packet_count: usize,
    pub elapsed: Duration,
    /// Worst gap between a frame's deadline and its actual send
    pub max_lateness: Duration,
    /// Frames sent later than the drift tolerance
    pub late_frames: usize,
}

/// Cadence settings shared by all jobs of a dialer
#[derive(Debug, Clone)]
pub struct PacketPacer {
    interval: Duration,
    drift_tolerance: Duration,
    send_timeout: Duration,
}

impl PacketPacer {
    pub fn new(interval: Duration, drift_tolerance: Duration, send_timeout: Duration) -> Self {
        Self {
            interval,
            drift_tolerance,
            send_timeout,
        }
    }

    pub fn from_config(config: &VosConfig) -> Self {
        Self::new(config.frame_interval(), config.drift_tolerance(), config.send_timeout())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Build a job for `frames`, stopped by `cancel`
    pub fn job(&self, frames: Vec<Bytes>, cancel: CancellationToken) -> PacingJob {
        PacingJob {
            frames: frames.into(),
            interval: self.interval,
            drift_tolerance: self.drift_tolerance,
            send_timeout: self.send_timeout,
            cancel,
        }
    }
}

/// One send's worth of frames and its schedule
#[derive(Debug)]
pub struct PacingJob {
    frames: VecDeque<Bytes>,
    interval: Duration,
    drift_tolerance: Duration,
    send_timeout: Duration,
    cancel: CancellationToken,
}

impl PacingJob {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Send every frame on schedule.
    ///
    /// Returns once the last frame's slot has elapsed, so the report's
    /// `elapsed` is `packet_count * interval` when nothing ran late.
    pub async fn run<S: FrameSink + ?Sized>(mut self, sink: &S) -> Result<PacingReport, VosError> {
        let start = Instant::now();
        let total = self.frames.len();
        let mut sent = 0usize;
        let mut max_lateness = Duration::ZERO;
        let mut late_frames = 0usize;

        while let Some(frame) = self.frames.pop_front() {
            let deadline = start + self.interval * sent as u32;
            self.wait_until(deadline, sent).await?;

            let lateness = Instant::now().saturating_duration_since(deadline);
            max_lateness = max_lateness.max(lateness);
            if lateness > self.drift_tolerance {
                late_frames += 1;
                tracing::warn!(
                    "Frame {} of {} sent {:?} behind schedule",
                    sent + 1,
                    total,
                    lateness
                );
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(VosError::Cancelled { packets_sent: sent });
                }
                result = timeout(self.send_timeout, sink.send_frame(&frame)) => match result {
                    Ok(Ok(())) => sent += 1,
                    Ok(Err(e)) => return Err(e),
                    Err(_) => return Err(VosError::SendTimeout(self.send_timeout)),
                },
            }
        }

        self.wait_until(start + self.interval * total as u32, sent).await?;

        Ok(PacingReport {
            packet_count: sent,
            elapsed: start.elapsed(),
            max_lateness,
            late_frames,
        })
    }

    async fn wait_until(&self, deadline: Instant, sent: usize) -> Result<(), VosError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(VosError::Cancelled { packets_sent: sent }),
            _ = sleep_until(deadline) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records when each frame arrived; optionally stalls on one frame
    struct RecordingSink {
        start: Instant,
        sent: Mutex<Vec<Duration>>,
        stall_on: Option<(usize, Duration)>,
    }

    impl RecordingSink {
        fn new(stall_on: Option<(usize, Duration)>) -> Self {
            Self {
                start: Instant::now(),
                sent: Mutex::new(Vec::new()),
                stall_on,
            }
        }

        fn times(&self) -> Vec<Duration> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_frame(&self, _frame: &[u8]) -> Result<(), VosError> {
            let index = {
                let mut sent = self.sent.lock().unwrap();
                sent.push(self.start.elapsed());
                sent.len() - 1
            };
            if let Some((stall_index, delay)) = self.stall_on {
                if index == stall_index {
                    tokio::time::sleep(delay).await;
                }
            }
            Ok(())
        }
    }

    struct HungSink;

    #[async_trait]
    impl FrameSink for HungSink {
        async fn send_frame(&self, _frame: &[u8]) -> Result<(), VosError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl FrameSink for FailingSink {
        async fn send_frame(&self, _frame: &[u8]) -> Result<(), VosError> {
            Err(VosError::Transport("connection refused".to_string()))
        }
    }

    fn pacer() -> PacketPacer {
        PacketPacer::new(Duration::from_millis(20), Duration::from_millis(50), Duration::from_millis(100))
    }

    fn frames(n: usize) -> Vec<Bytes> {
        (0..n).map(|_| Bytes::from(vec![0xD5u8; 160])).collect()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Timer deadlines round up to the next millisecond tick
    fn assert_near(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual <= expected + ms(2),
            "expected ~{:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn test_from_config_uses_configured_cadence() {
        let config = VosConfig {
            frame_interval_ms: 30,
            ..Default::default()
        };
        assert_eq!(PacketPacer::from_config(&config).interval(), ms(30));
        assert_eq!(PacketPacer::from_config(&VosConfig::default()).interval(), ms(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_follow_absolute_schedule() {
        let sink = RecordingSink::new(None);
        let report = pacer().job(frames(50), CancellationToken::new()).run(&sink).await.unwrap();

        assert_eq!(report.packet_count, 50);
        assert_near(report.elapsed, ms(1000));
        assert_eq!(report.late_frames, 0);

        let times = sink.times();
        assert_eq!(times.len(), 50);
        for (i, &t) in times.iter().enumerate() {
            assert_near(t, ms(20 * i as u64));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrun_does_not_compound() {
        // Frame 2 stalls the sink for 50ms; 3 and 4 go out immediately, 5 is back on time
        let sink = RecordingSink::new(Some((2, ms(50))));
        let report = pacer().job(frames(10), CancellationToken::new()).run(&sink).await.unwrap();

        let times = sink.times();
        assert_eq!(times.len(), 10);
        assert_near(times[2], ms(40));
        assert_near(times[3], ms(90));
        assert_near(times[4], ms(90));
        assert_near(times[5], ms(100));
        assert_near(times[9], ms(180));

        assert_eq!(report.packet_count, 10);
        assert_near(report.elapsed, ms(200));
        assert_near(report.max_lateness, ms(30));
        assert_eq!(report.late_frames, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lateness_beyond_tolerance_is_counted() {
        let sink = RecordingSink::new(Some((2, ms(80))));
        let report = pacer().job(frames(10), CancellationToken::new()).run(&sink).await.unwrap();

        assert_eq!(report.packet_count, 10);
        assert_near(report.max_lateness, ms(60));
        assert_eq!(report.late_frames, 1);
        assert_near(report.elapsed, ms(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_before_next_frame() {
        let sink = RecordingSink::new(None);
        let cancel = CancellationToken::new();
        let job = pacer().job(frames(50), cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(ms(50)).await;
            cancel.cancel();
        });

        let result = job.run(&sink).await;
        canceller.await.unwrap();

        assert!(matches!(result, Err(VosError::Cancelled { packets_sent: 3 })));
        assert_eq!(sink.times().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_sends_nothing() {
        let sink = RecordingSink::new(None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pacer().job(frames(5), cancel).run(&sink).await;
        assert!(matches!(result, Err(VosError::Cancelled { packets_sent: 0 })));
        assert!(sink.times().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_sink_times_out() {
        let result = pacer().job(frames(5), CancellationToken::new()).run(&HungSink).await;
        assert!(matches!(result, Err(VosError::SendTimeout(d)) if d == ms(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_error_ends_job() {
        let result = pacer().job(frames(5), CancellationToken::new()).run(&FailingSink).await;
        assert!(matches!(result, Err(VosError::Transport(_))));
    }

    #[tokio::test]
    async fn test_real_clock_drift_is_bounded() {
        let sink = RecordingSink::new(None);
        let started = std::time::Instant::now();
        let report = pacer().job(frames(50), CancellationToken::new()).run(&sink).await.unwrap();
        let wall = started.elapsed();

        assert_eq!(report.packet_count, 50);
        assert!(wall >= ms(1000) - ms(1), "finished early: {:?}", wall);
        assert!(wall < ms(1050), "drifted: {:?}", wall);
    }
}
