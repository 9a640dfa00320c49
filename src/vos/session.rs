//! Session Registry
//!
//! In-memory table of active outbound audio channels keyed by call id.
//! Each entry exclusively owns its UDP transport; pacing tasks borrow it
//! through an `Arc` and never hold the registry lock while sending.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::config::{DuplicatePolicy, VosConfig};
use super::pacer::FrameSink;
use super::rtp::RtpPacketizer;
use super::VosError;

/// Caller-visible view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub call_id: String,
    pub remote_host: String,
    pub remote_port: u16,
    /// Address `remote_host` resolved to when the session was created
    pub remote_addr: SocketAddr,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-session transmit counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub sends_completed: u64,
    pub sends_failed: u64,
}

/// Outbound UDP socket for one session
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    remote: SocketAddr,
    rtp: Option<Mutex<RtpPacketizer>>,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl UdpTransport {
    /// Bind an ephemeral local port for datagrams to `remote`.
    ///
    /// The socket stays unconnected so ICMP port-unreachable replies from the
    /// far end do not surface as send errors.
    pub async fn bind(bind_ip: IpAddr, remote: SocketAddr, rtp_payload_type: Option<u8>) -> Result<Self, VosError> {
        let local_ip = match (bind_ip, remote) {
            (IpAddr::V4(ip), SocketAddr::V6(_)) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            _ => bind_ip,
        };

        let socket = UdpSocket::bind(SocketAddr::new(local_ip, 0))
            .await
            .map_err(|e| VosError::Transport(format!("Failed to bind UDP socket on {}: {}", local_ip, e)))?;

        Ok(Self {
            socket,
            remote,
            rtp: rtp_payload_type.map(|pt| Mutex::new(RtpPacketizer::new(pt))),
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, VosError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl FrameSink for UdpTransport {
    async fn send_frame(&self, frame: &[u8]) -> Result<(), VosError> {
        let framed = self.rtp.as_ref().map(|packetizer| {
            packetizer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .packetize(frame)
        });
        let datagram: &[u8] = framed.as_deref().unwrap_or(frame);

        self.socket
            .send_to(datagram, self.remote)
            .await
            .map_err(|e| VosError::Transport(format!("Send to {} failed: {}", self.remote, e)))?;

        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(frame.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct SendCounters {
    pub completed: AtomicU64,
    pub failed: AtomicU64,
}

/// What a send needs from a session, detached from the registry lock
#[derive(Debug, Clone)]
pub(crate) struct SessionHandle {
    pub transport: Arc<UdpTransport>,
    pub cancel: CancellationToken,
    /// Serializes sends on one session so their frames never interleave
    pub send_lock: Arc<tokio::sync::Mutex<()>>,
    pub counters: Arc<SendCounters>,
}

#[derive(Debug)]
struct SessionEntry {
    session: Session,
    handle: SessionHandle,
}

impl SessionEntry {
    /// Mark inactive and stop in-flight sends; the socket closes once the
    /// last pacing task drops its handle.
    fn teardown(mut self) -> Session {
        self.session.is_active = false;
        self.handle.cancel.cancel();
        tracing::info!(
            "Closed session {} ({} packets sent)",
            self.session.call_id,
            self.handle.transport.packets_sent()
        );
        self.session
    }
}

/// Registry of active sessions
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    bind_ip: IpAddr,
    rtp_payload_type: Option<u8>,
    duplicate_policy: DuplicatePolicy,
}

impl SessionRegistry {
    pub fn new(config: &VosConfig) -> Result<Self, VosError> {
        let bind_ip = config
            .bind_addr
            .parse()
            .map_err(|_| VosError::Config(format!("invalid bind address: {}", config.bind_addr)))?;

        Ok(Self {
            sessions: RwLock::new(HashMap::new()),
            bind_ip,
            rtp_payload_type: config.rtp_framing.then(|| config.codec.payload_type()),
            duplicate_policy: config.duplicate_policy,
        })
    }

    /// Open a transport to `remote_host:remote_port` and register it under `call_id`
    pub async fn create_session(&self, call_id: &str, remote_host: &str, remote_port: u16) -> Result<Session, VosError> {
        let (session, _replaced) = self.open_session(call_id, remote_host, remote_port).await?;
        Ok(session)
    }

    /// Like `create_session`, also returning the entry it displaced under `Replace`
    pub(crate) async fn open_session(
        &self,
        call_id: &str,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<(Session, Option<Session>), VosError> {
        if call_id.is_empty() {
            return Err(VosError::InvalidArgument("call id must not be empty".to_string()));
        }
        if remote_host.is_empty() || remote_port == 0 {
            return Err(VosError::InvalidArgument(format!(
                "invalid remote endpoint {}:{}",
                remote_host, remote_port
            )));
        }

        // Cheap early rejection before touching the network
        if self.duplicate_policy == DuplicatePolicy::Reject && self.sessions.read().await.contains_key(call_id) {
            return Err(VosError::SessionExists(call_id.to_string()));
        }

        let remote_addr = resolve(remote_host, remote_port).await?;
        let transport = UdpTransport::bind(self.bind_ip, remote_addr, self.rtp_payload_type).await?;
        let local_addr = transport.local_addr()?;

        let session = Session {
            call_id: call_id.to_string(),
            remote_host: remote_host.to_string(),
            remote_port,
            remote_addr,
            is_active: true,
            created_at: Utc::now(),
        };
        let entry = SessionEntry {
            session: session.clone(),
            handle: SessionHandle {
                transport: Arc::new(transport),
                cancel: CancellationToken::new(),
                send_lock: Arc::new(tokio::sync::Mutex::new(())),
                counters: Arc::new(SendCounters::default()),
            },
        };

        let replaced = {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(call_id) && self.duplicate_policy == DuplicatePolicy::Reject {
                return Err(VosError::SessionExists(call_id.to_string()));
            }
            sessions.insert(call_id.to_string(), entry)
        };

        let replaced = replaced.map(|old| {
            tracing::info!("Replacing active session {}", call_id);
            old.teardown()
        });

        tracing::info!(
            "Created session {} -> {} (local {})",
            call_id,
            remote_addr,
            local_addr
        );
        Ok((session, replaced))
    }

    /// Snapshot of an active session, `None` when unknown
    pub async fn get_session_status(&self, call_id: &str) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions
            .get(call_id)
            .filter(|entry| entry.session.is_active)
            .map(|entry| entry.session.clone())
    }

    pub async fn get_active_sessions(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|entry| entry.session.is_active)
            .map(|entry| entry.session.call_id.clone())
            .collect()
    }

    pub async fn get_session_stats(&self, call_id: &str) -> Option<SessionStats> {
        let sessions = self.sessions.read().await;
        sessions.get(call_id).map(|entry| {
            let handle = &entry.handle;
            SessionStats {
                packets_sent: handle.transport.packets_sent(),
                bytes_sent: handle.transport.bytes_sent(),
                sends_completed: handle.counters.completed.load(Ordering::Relaxed),
                sends_failed: handle.counters.failed.load(Ordering::Relaxed),
            }
        })
    }

    pub(crate) async fn handle(&self, call_id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions
            .get(call_id)
            .filter(|entry| entry.session.is_active)
            .map(|entry| entry.handle.clone())
    }

    /// Close one session. Returns whether anything was closed; unknown ids are a no-op.
    pub async fn close_session(&self, call_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(call_id);
        match removed {
            Some(entry) => {
                entry.teardown();
                true
            }
            None => {
                tracing::debug!("close_session: {} not found", call_id);
                false
            }
        }
    }

    /// Close every session, returning the ids that were closed
    pub async fn close_all_sessions(&self) -> Vec<String> {
        let drained: Vec<SessionEntry> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, entry)| entry).collect()
        };

        drained
            .into_iter()
            .map(|entry| entry.teardown().call_id)
            .collect()
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, VosError> {
    let resolve_error = |reason: String| VosError::Resolve {
        host: host.to_string(),
        port,
        reason,
    };

    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| resolve_error(e.to_string()))?;
    addrs
        .next()
        .ok_or_else(|| resolve_error("no addresses returned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(policy: DuplicatePolicy) -> SessionRegistry {
        let config = VosConfig {
            bind_addr: "127.0.0.1".to_string(),
            duplicate_policy: policy,
            ..VosConfig::default()
        };
        SessionRegistry::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let registry = registry(DuplicatePolicy::Reject);
        let session = registry.create_session("call-1", "127.0.0.1", 5060).await.unwrap();

        assert_eq!(session.call_id, "call-1");
        assert!(session.is_active);
        assert_eq!(session.remote_addr, "127.0.0.1:5060".parse().unwrap());

        let status = registry.get_session_status("call-1").await.unwrap();
        assert_eq!(status, session);
        assert_eq!(registry.get_active_sessions().await, vec!["call-1".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_errors() {
        let registry = registry(DuplicatePolicy::Reject);
        assert!(registry.get_session_status("nope").await.is_none());
        assert!(registry.get_session_stats("nope").await.is_none());
        assert!(!registry.close_session("nope").await);
        assert!(registry.close_all_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let registry = registry(DuplicatePolicy::Reject);
        registry.create_session("call-1", "127.0.0.1", 5060).await.unwrap();

        assert!(registry.close_session("call-1").await);
        assert!(!registry.close_session("call-1").await);
        assert!(registry.get_session_status("call-1").await.is_none());
    }

    #[tokio::test]
    async fn test_close_cancels_session_token() {
        let registry = registry(DuplicatePolicy::Reject);
        registry.create_session("call-1", "127.0.0.1", 5060).await.unwrap();
        let handle = registry.handle("call-1").await.unwrap();

        registry.close_session("call-1").await;
        assert!(handle.cancel.is_cancelled());
        assert!(registry.handle("call-1").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let registry = registry(DuplicatePolicy::Reject);
        registry.create_session("call-1", "127.0.0.1", 5060).await.unwrap();

        let err = registry.create_session("call-1", "127.0.0.1", 6000).await.unwrap_err();
        assert!(matches!(err, VosError::SessionExists(id) if id == "call-1"));

        // Original untouched
        let status = registry.get_session_status("call-1").await.unwrap();
        assert_eq!(status.remote_port, 5060);
    }

    #[tokio::test]
    async fn test_duplicate_replaced() {
        let registry = registry(DuplicatePolicy::Replace);
        registry.create_session("call-1", "127.0.0.1", 5060).await.unwrap();
        let old = registry.handle("call-1").await.unwrap();

        let (_, replaced) = registry.open_session("call-1", "127.0.0.1", 6000).await.unwrap();

        let replaced = replaced.unwrap();
        assert_eq!(replaced.remote_port, 5060);
        assert!(!replaced.is_active);
        assert!(old.cancel.is_cancelled());
        let status = registry.get_session_status("call-1").await.unwrap();
        assert_eq!(status.remote_port, 6000);
        assert_eq!(registry.get_active_sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let registry = registry(DuplicatePolicy::Reject);
        assert!(matches!(
            registry.create_session("", "127.0.0.1", 5060).await,
            Err(VosError::InvalidArgument(_))
        ));
        assert!(matches!(
            registry.create_session("call-1", "127.0.0.1", 0).await,
            Err(VosError::InvalidArgument(_))
        ));
        assert!(registry.get_active_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_session_serializes_camel_case() {
        let registry = registry(DuplicatePolicy::Reject);
        let session = registry.create_session("call-1", "127.0.0.1", 5060).await.unwrap();

        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["callId"], "call-1");
        assert_eq!(json["isActive"], true);
        assert_eq!(json["remoteHost"], "127.0.0.1");
        assert_eq!(json["remotePort"], 5060);
    }

    #[tokio::test]
    async fn test_transport_sends_raw_frames() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote = receiver.local_addr().unwrap();

        let transport = UdpTransport::bind("127.0.0.1".parse().unwrap(), remote, None).await.unwrap();
        assert_eq!(transport.remote_addr(), remote);
        transport.send_frame(&[0xD5u8; 160]).await.unwrap();

        let mut buf = [0u8; 2048];
        let (len, from) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(len, 160);
        assert_eq!(from, transport.local_addr().unwrap());
        assert_eq!(transport.packets_sent(), 1);
        assert_eq!(transport.bytes_sent(), 160);
    }
}
