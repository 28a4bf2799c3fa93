//! Peer link: TCP transport with newline-delimited JSON frames.
//!
//! Both peers speak the same protocol after the handshake, regardless
//! of who dialed. The handshake authenticates with an HMAC-SHA256 over
//! a fresh nonce using the shared pairing secret; no task data flows
//! before it completes. The dialing side retries with exponential
//! backoff, 1s doubling to a 60s ceiling, reset after a successful
//! session.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::error::{Result, SyncError};
use crate::sync::engine::SyncEngine;
use crate::sync::envelope::EventEnvelope;
use crate::sync::manifest::{EntityRef, ManifestEntry};

type HmacSha256 = Hmac<Sha256>;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_INTERVAL: Duration = Duration::from_secs(1);
const DRAIN_BATCH: usize = 64;

/// Frames on the wire, one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
enum WireMessage {
    Hello { device_id: String, user_id: Option<String>, nonce: String, mac: String },
    HelloAck { device_id: String, mac: String },
    Manifest { entries: Vec<ManifestEntry> },
    Want { refs: Vec<EntityRef> },
    Envelope { envelope: EventEnvelope },
}

#[derive(Debug, Clone, Copy)]
enum Role {
    Dialer,
    Listener,
}

/// One end of the peer connection.
#[derive(Clone)]
pub struct SyncLink {
    engine: Arc<SyncEngine>,
    secret: Vec<u8>,
    shutdown: watch::Receiver<bool>,
}

impl SyncLink {
    pub fn new(engine: Arc<SyncEngine>, secret: Vec<u8>, shutdown: watch::Receiver<bool>) -> Self {
        Self { engine, secret, shutdown }
    }

    /// Accept peers until shutdown. Each connection gets its own
    /// session task.
    pub async fn listen(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = accepted.map_err(SyncError::Io)?;
                    tracing::info!(%addr, "peer connected");
                    let link = self.clone();
                    tokio::spawn(async move {
                        if let Err(error) = link.session(stream, Role::Listener).await {
                            tracing::warn!(%error, "sync session ended");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Dial the peer, retrying with backoff, until shutdown.
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        let mut backoff = INITIAL_BACKOFF;
        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            match TcpStream::connect((host, port)).await {
                Ok(stream) => match self.session(stream, Role::Dialer).await {
                    Ok(()) => backoff = INITIAL_BACKOFF,
                    Err(error) => tracing::warn!(%error, "sync session failed"),
                },
                Err(error) => {
                    tracing::debug!(%error, %host, port, "peer unreachable");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn session(&self, stream: TcpStream, role: Role) -> Result<()> {
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half).lines();

        self.handshake(&mut reader, &mut writer, role).await?;
        self.engine.set_in_progress(true);
        let outcome = self.exchange(&mut reader, &mut writer).await;
        self.engine.set_in_progress(false);
        outcome
    }

    async fn handshake(
        &self,
        reader: &mut Lines<BufReader<OwnedReadHalf>>,
        writer: &mut OwnedWriteHalf,
        role: Role,
    ) -> Result<()> {
        let device_id = self.engine.device_id().to_string();
        match role {
            Role::Dialer => {
                let nonce = uuid::Uuid::new_v4().to_string();
                let mac = self.mac(&["hello", &device_id, &nonce])?;
                send(
                    writer,
                    &WireMessage::Hello {
                        device_id: device_id.clone(),
                        user_id: self.engine.user_id().map(str::to_string),
                        nonce: nonce.clone(),
                        mac,
                    },
                )
                .await?;
                match read_message(reader).await? {
                    WireMessage::HelloAck { device_id: peer, mac } => {
                        if !self.verify(&["ack", &peer, &nonce], &mac) {
                            return Err(SyncError::HandshakeRejected.into());
                        }
                        tracing::info!(peer = %peer, "handshake complete");
                    }
                    _ => return Err(SyncError::HandshakeRejected.into()),
                }
            }
            Role::Listener => {
                match read_message(reader).await? {
                    WireMessage::Hello { device_id: peer, nonce, mac, .. } => {
                        if !self.verify(&["hello", &peer, &nonce], &mac) {
                            return Err(SyncError::HandshakeRejected.into());
                        }
                        let ack_mac = self.mac(&["ack", &device_id, &nonce])?;
                        send(writer, &WireMessage::HelloAck { device_id, mac: ack_mac }).await?;
                        tracing::info!(peer = %peer, "handshake complete");
                    }
                    _ => return Err(SyncError::HandshakeRejected.into()),
                }
            }
        }
        Ok(())
    }

    /// Post-handshake loop: manifests first, then envelopes both ways.
    async fn exchange(
        &self,
        reader: &mut Lines<BufReader<OwnedReadHalf>>,
        writer: &mut OwnedWriteHalf,
    ) -> Result<()> {
        let entries = self.engine.local_manifest().await?;
        send(writer, &WireMessage::Manifest { entries }).await?;

        let mut drain = tokio::time::interval(DRAIN_INTERVAL);
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                line = reader.next_line() => match line {
                    Ok(Some(line)) => self.dispatch(&line, writer).await?,
                    Ok(None) => break, // peer closed
                    Err(error) => return Err(SyncError::Io(error).into()),
                },
                _ = drain.tick() => {
                    for envelope in self.engine.drain_outbound(DRAIN_BATCH, Utc::now()).await? {
                        send(writer, &WireMessage::Envelope { envelope }).await?;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        self.flush(writer).await?;
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    async fn dispatch(&self, line: &str, writer: &mut OwnedWriteHalf) -> Result<()> {
        let message: WireMessage =
            serde_json::from_str(line).map_err(SyncError::Codec)?;
        match message {
            WireMessage::Manifest { entries } => {
                let (request, push) = self.engine.reconcile(&entries).await?;
                tracing::debug!(
                    request = request.len(),
                    push = push.len(),
                    "manifest reconciled"
                );
                if !request.is_empty() {
                    send(writer, &WireMessage::Want { refs: request }).await?;
                }
                for envelope in push {
                    send(writer, &WireMessage::Envelope { envelope }).await?;
                }
                self.engine.mark_synced(Utc::now()).await;
            }
            WireMessage::Want { refs } => {
                for envelope in self.engine.envelopes_for(&refs).await? {
                    send(writer, &WireMessage::Envelope { envelope }).await?;
                }
            }
            WireMessage::Envelope { envelope } => {
                self.engine.apply_remote(&envelope, Utc::now()).await?;
                self.engine.mark_synced(Utc::now()).await;
            }
            WireMessage::Hello { .. } | WireMessage::HelloAck { .. } => {
                tracing::debug!("unexpected handshake frame mid-session");
            }
        }
        Ok(())
    }

    /// Push everything still queued before the connection closes.
    /// Bounded: reports how much was left behind when the deadline
    /// passes.
    async fn flush(&self, writer: &mut OwnedWriteHalf) -> Result<()> {
        let envelopes = self.engine.drain_all_outbound().await?;
        if envelopes.is_empty() {
            return Ok(());
        }
        let total = envelopes.len();
        let mut sent = 0usize;
        let outcome = tokio::time::timeout(FLUSH_TIMEOUT, async {
            for envelope in envelopes {
                send(writer, &WireMessage::Envelope { envelope }).await?;
                sent += 1;
            }
            writer.flush().await.map_err(SyncError::Io)?;
            Ok(())
        })
        .await;
        match outcome {
            Ok(result) => result,
            Err(_) => Err(SyncError::FlushIncomplete { pending: total - sent }.into()),
        }
    }

    fn mac(&self, parts: &[&str]) -> Result<String, SyncError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| SyncError::HandshakeRejected)?;
        for part in parts {
            mac.update(part.as_bytes());
        }
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn verify(&self, parts: &[&str], claimed: &str) -> bool {
        let Ok(bytes) = hex::decode(claimed) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return false;
        };
        for part in parts {
            mac.update(part.as_bytes());
        }
        mac.verify_slice(&bytes).is_ok()
    }
}

async fn send(writer: &mut OwnedWriteHalf, message: &WireMessage) -> Result<()> {
    let mut line = serde_json::to_string(message).map_err(SyncError::Codec)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await.map_err(SyncError::Io)?;
    Ok(())
}

async fn read_message(reader: &mut Lines<BufReader<OwnedReadHalf>>) -> Result<WireMessage> {
    let line = tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.next_line())
        .await
        .map_err(|_| SyncError::Connection("handshake timed out".into()))?
        .map_err(SyncError::Io)?
        .ok_or_else(|| SyncError::Connection("peer closed during handshake".into()))?;
    Ok(serde_json::from_str(&line).map_err(SyncError::Codec)?)
}
