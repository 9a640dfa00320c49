//! Dialer Service
//!
//! Public entry point of the voice bridge. Owns the session registry and
//! drives the precisely-timed send path: split audio into 20ms frames, pace
//! them onto the session's transport from a dedicated task, report completion.

use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::audio_converter::{self, CodecConverter};
use super::config::VosConfig;
use super::pacer::PacketPacer;
use super::session::{Session, SessionRegistry, SessionStats};
use super::{split_frames, VosError, TELEPHONY_FRAME_BYTES};

/// Dialer-level events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialerEvent {
    SessionCreated { call_id: String },
    SessionClosed { call_id: String },
    /// All frames of a send went out
    SendComplete { call_id: String, packet_count: usize },
    /// A send stopped on a transport error or timeout
    SendFailed { call_id: String, error: String },
    /// A send was stopped by session close or `SendHandle::cancel`
    SendCancelled { call_id: String, packets_sent: usize },
}

/// Completion payload of a paced send
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendComplete {
    pub call_id: String,
    pub packet_count: usize,
    pub elapsed: Duration,
    pub max_lateness: Duration,
    pub late_frames: usize,
}

/// An in-flight paced send
#[derive(Debug)]
pub struct SendHandle {
    call_id: String,
    packet_count: usize,
    cancel: CancellationToken,
    task: JoinHandle<Result<SendComplete, VosError>>,
}

impl SendHandle {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Frames queued for this send
    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Stop this send only; the session stays open
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the pacing task to finish
    pub async fn wait(self) -> Result<SendComplete, VosError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(VosError::Transport(format!(
                "pacing task for {} aborted: {}",
                self.call_id, e
            ))),
        }
    }
}

/// Voice bridge orchestrator
pub struct DialerService {
    config: VosConfig,
    registry: SessionRegistry,
    pacer: PacketPacer,
    converter: CodecConverter,
    event_tx: mpsc::Sender<DialerEvent>,
}

impl DialerService {
    /// Create a dialer and the receiver for its events
    pub fn new(config: VosConfig) -> Result<(Self, mpsc::Receiver<DialerEvent>), VosError> {
        config.validate()?;
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);

        let dialer = Self {
            registry: SessionRegistry::new(&config)?,
            pacer: PacketPacer::from_config(&config),
            converter: CodecConverter::from_config(&config),
            config,
            event_tx,
        };

        Ok((dialer, event_rx))
    }

    /// Create from `VOS_*` environment variables
    pub fn from_env() -> Result<(Self, mpsc::Receiver<DialerEvent>), VosError> {
        Self::new(VosConfig::from_env())
    }

    pub fn config(&self) -> &VosConfig {
        &self.config
    }

    pub fn converter(&self) -> &CodecConverter {
        &self.converter
    }

    pub async fn create_session(&self, call_id: &str, remote_host: &str, remote_port: u16) -> Result<Session, VosError> {
        let (session, replaced) = self.registry.open_session(call_id, remote_host, remote_port).await?;
        if let Some(old) = replaced {
            emit(&self.event_tx, DialerEvent::SessionClosed { call_id: old.call_id });
        }
        emit(&self.event_tx, DialerEvent::SessionCreated {
            call_id: call_id.to_string(),
        });
        Ok(session)
    }

    pub async fn get_session_status(&self, call_id: &str) -> Option<Session> {
        self.registry.get_session_status(call_id).await
    }

    pub async fn get_active_sessions(&self) -> Vec<String> {
        self.registry.get_active_sessions().await
    }

    pub async fn get_session_stats(&self, call_id: &str) -> Option<SessionStats> {
        self.registry.get_session_stats(call_id).await
    }

    /// Close a session, cancelling its in-flight sends. Unknown ids are ignored.
    pub async fn close_session(&self, call_id: &str) {
        if self.registry.close_session(call_id).await {
            emit(&self.event_tx, DialerEvent::SessionClosed {
                call_id: call_id.to_string(),
            });
        }
    }

    /// Close every session; call at shutdown
    pub async fn close_all_sessions(&self) {
        let closed = self.registry.close_all_sessions().await;
        if !closed.is_empty() {
            tracing::info!("Closed {} sessions", closed.len());
        }
        for call_id in closed {
            emit(&self.event_tx, DialerEvent::SessionClosed { call_id });
        }
    }

    /// Validate and start pacing telephony audio on `call_id`.
    ///
    /// Validation errors return before any frame is scheduled. Sends on the
    /// same session run one after another in submission order.
    pub async fn start_send(&self, call_id: &str, audio: impl Into<Bytes>) -> Result<SendHandle, VosError> {
        let audio: Bytes = audio.into();
        let session = self
            .registry
            .handle(call_id)
            .await
            .ok_or_else(|| VosError::SessionNotFound(call_id.to_string()))?;

        let frame_count = split_frames(&audio, TELEPHONY_FRAME_BYTES)?.len();
        let frames: Vec<Bytes> = (0..frame_count)
            .map(|i| audio.slice(i * TELEPHONY_FRAME_BYTES..(i + 1) * TELEPHONY_FRAME_BYTES))
            .collect();

        let cancel = session.cancel.child_token();
        let job = self.pacer.job(frames, cancel.clone());
        let event_tx = self.event_tx.clone();
        let id = call_id.to_string();

        tracing::debug!("Queued {} frames for {}", frame_count, call_id);

        let task = tokio::spawn(async move {
            let job_cancel = job.cancel_token();

            let _turn = tokio::select! {
                biased;
                _ = job_cancel.cancelled() => {
                    emit(&event_tx, DialerEvent::SendCancelled { call_id: id, packets_sent: 0 });
                    return Err(VosError::Cancelled { packets_sent: 0 });
                }
                guard = session.send_lock.clone().lock_owned() => guard,
            };

            let result = match job.run(session.transport.as_ref()).await {
                // Closed right after the last slot: still no completion for a closed session
                Ok(report) if job_cancel.is_cancelled() => Err(VosError::Cancelled {
                    packets_sent: report.packet_count,
                }),
                other => other,
            };

            match result {
                Ok(report) => {
                    session.counters.completed.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        "Sent {} packets to {} in {:?} (max lateness {:?})",
                        report.packet_count,
                        id,
                        report.elapsed,
                        report.max_lateness
                    );
                    emit(&event_tx, DialerEvent::SendComplete {
                        call_id: id.clone(),
                        packet_count: report.packet_count,
                    });
                    Ok(SendComplete {
                        call_id: id,
                        packet_count: report.packet_count,
                        elapsed: report.elapsed,
                        max_lateness: report.max_lateness,
                        late_frames: report.late_frames,
                    })
                }
                Err(VosError::Cancelled { packets_sent }) => {
                    tracing::debug!("Send on {} cancelled after {} packets", id, packets_sent);
                    emit(&event_tx, DialerEvent::SendCancelled {
                        call_id: id,
                        packets_sent,
                    });
                    Err(VosError::Cancelled { packets_sent })
                }
                Err(e) => {
                    session.counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("Send on {} failed: {}", id, e);
                    emit(&event_tx, DialerEvent::SendFailed {
                        call_id: id,
                        error: e.to_string(),
                    });
                    Err(e)
                }
            }
        });

        Ok(SendHandle {
            call_id: call_id.to_string(),
            packet_count: frame_count,
            cancel,
            task,
        })
    }

    /// Pace telephony audio (160-byte frames) to the session and wait for completion
    pub async fn send_audio_with_precise_timing(&self, call_id: &str, audio: impl Into<Bytes>) -> Result<SendComplete, VosError> {
        self.start_send(call_id, audio).await?.wait().await
    }

    /// Convert wideband PCM from the speech engine to telephony frames, then pace them
    pub async fn send_wideband_with_precise_timing(&self, call_id: &str, pcm: &[u8]) -> Result<SendComplete, VosError> {
        if self.registry.handle(call_id).await.is_none() {
            return Err(VosError::SessionNotFound(call_id.to_string()));
        }
        let telephony = self.converter.wideband_to_telephony_stream(pcm)?;
        self.send_audio_with_precise_timing(call_id, telephony).await
    }

    pub fn pcma_to_pcm16k(&self, frame: &[u8]) -> Result<Vec<u8>, VosError> {
        audio_converter::pcma_to_pcm16k(frame)
    }

    pub fn pcm24k_to_pcma(&self, frame: &[u8]) -> Result<Vec<u8>, VosError> {
        audio_converter::pcm24k_to_pcma(frame)
    }
}

/// Deliver an event without ever stalling a pacing task
fn emit(event_tx: &mpsc::Sender<DialerEvent>, event: DialerEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            tracing::warn!("Dialer event channel full, dropping {:?}", event);
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}
