//! Bounded pool of long-lived WebSocket sessions.
//!
//! One pool exists per WS upstream URL. Sessions are strict request/response:
//! the caller acquires a session, does one `send` + `recv`, and releases it.
//! A session that fails either operation is marked broken and is closed on
//! release instead of returning to the pool; idle sessions are liveness-probed
//! with a ping frame before being handed out again.
//!
//! The idle set is a bounded channel; an `active` counter guarded by a mutex
//! tracks every open session (idle or checked out). The mutex is never held
//! across a network call.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::mpsc::{self, error::TrySendError},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::upstream::errors::UpstreamError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Sizing and liveness settings for a [`WsPool`].
#[derive(Debug, Clone)]
pub struct WsPoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    /// Idle time after which a session is probed before reuse.
    pub ping_interval: Duration,
    /// Write deadline for the liveness ping.
    pub ping_timeout: Duration,
}

impl Default for WsPoolConfig {
    fn default() -> Self {
        Self {
            min_size: 8,
            max_size: 8,
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(5),
        }
    }
}

/// A single long-lived WebSocket session carrying one request at a time.
#[derive(Debug)]
pub struct WsSession {
    stream: WsStream,
    last_ok: Instant,
    broken: bool,
}

impl WsSession {
    /// Opens a new session to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::WebSocket`] when the handshake fails.
    pub async fn connect(url: &str) -> Result<Self, UpstreamError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| UpstreamError::WebSocket(format!("connect failed: {e}")))?;
        Ok(Self { stream, last_ok: Instant::now(), broken: false })
    }

    /// Sends one JSON payload as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::WebSocket`] on write failure; the session is
    /// marked broken.
    pub async fn send(&mut self, payload: &Value) -> Result<(), UpstreamError> {
        let text = payload.to_string();
        match self.stream.send(Message::Text(text.into())).await {
            Ok(()) => {
                self.last_ok = Instant::now();
                Ok(())
            }
            Err(e) => {
                self.broken = true;
                Err(UpstreamError::WebSocket(format!("send failed: {e}")))
            }
        }
    }

    /// Receives the next text frame and parses it as JSON.
    ///
    /// Control frames are skipped. Stream end or a close frame marks the
    /// session broken.
    ///
    /// # Errors
    ///
    /// [`UpstreamError::WebSocket`] on transport failure,
    /// [`UpstreamError::InvalidResponse`] when the frame is not JSON.
    pub async fn recv(&mut self) -> Result<Value, UpstreamError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.last_ok = Instant::now();
                    return serde_json::from_str(&text).map_err(|e| {
                        self.broken = true;
                        UpstreamError::InvalidResponse(format!("frame is not JSON: {e}"))
                    });
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.broken = true;
                    return Err(UpstreamError::WebSocket("connection closed".into()));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.broken = true;
                    return Err(UpstreamError::WebSocket(format!("receive failed: {e}")));
                }
            }
        }
    }

    /// Liveness probe: a ping frame under a short write deadline.
    ///
    /// Returns `false` (and marks the session broken) when the write fails or
    /// times out.
    pub async fn probe(&mut self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.stream.send(Message::Ping(Vec::new().into())))
            .await
        {
            Ok(Ok(())) => {
                self.last_ok = Instant::now();
                true
            }
            _ => {
                self.broken = true;
                false
            }
        }
    }

    /// Time since the last successful operation on this session.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_ok.elapsed()
    }

    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Closes the session, ignoring shutdown errors.
    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// Bounded pool of [`WsSession`]s for one upstream URL.
pub struct WsPool {
    url: String,
    config: WsPoolConfig,
    idle_tx: mpsc::Sender<WsSession>,
    idle_rx: tokio::sync::Mutex<mpsc::Receiver<WsSession>>,
    active: Mutex<usize>,
    closed: AtomicBool,
}

impl WsPool {
    /// Creates a pool and opens `min_size` sessions up front.
    ///
    /// Individual connection failures during warm-up are logged and
    /// tolerated; the pool may start under-full and refills on demand.
    pub async fn connect(url: impl Into<String>, mut config: WsPoolConfig) -> Self {
        if config.max_size < config.min_size {
            config.max_size = config.min_size;
        }
        let url = url.into();
        let (idle_tx, idle_rx) = mpsc::channel(config.max_size.max(1));
        let pool = Self {
            url,
            config,
            idle_tx,
            idle_rx: tokio::sync::Mutex::new(idle_rx),
            active: Mutex::new(0),
            closed: AtomicBool::new(false),
        };

        for _ in 0..pool.config.min_size {
            match WsSession::connect(&pool.url).await {
                Ok(session) => {
                    if pool.idle_tx.try_send(session).is_ok() {
                        *pool.active.lock() += 1;
                    }
                }
                Err(e) => {
                    warn!(url = %pool.url, error = %e, "websocket warm-up connection failed");
                }
            }
        }

        pool
    }

    /// Number of open sessions (idle plus checked out).
    #[must_use]
    pub fn active(&self) -> usize {
        *self.active.lock()
    }

    /// Takes a session, opening a new one when the pool is under capacity.
    ///
    /// Idle-for-too-long sessions are liveness-probed first; dead ones are
    /// discarded and replaced. When the pool is exhausted and at capacity,
    /// blocks until a session is released, the deadline elapses, or the pool
    /// closes.
    ///
    /// # Errors
    ///
    /// [`UpstreamError::RequestTimeout`] when `deadline` elapses,
    /// [`UpstreamError::PoolClosed`] when the pool has shut down,
    /// [`UpstreamError::WebSocket`] when a replacement connection fails.
    pub async fn acquire(&self, deadline: Duration) -> Result<WsSession, UpstreamError> {
        let deadline_at = Instant::now() + deadline;

        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(UpstreamError::PoolClosed);
            }

            let idle = { self.idle_rx.lock().await.try_recv().ok() };
            if let Some(session) = idle {
                return self.check_out(session).await;
            }

            let can_grow = {
                let mut active = self.active.lock();
                if *active < self.config.max_size {
                    *active += 1;
                    true
                } else {
                    false
                }
            };
            if can_grow {
                match WsSession::connect(&self.url).await {
                    Ok(session) => return Ok(session),
                    Err(e) => {
                        *self.active.lock() -= 1;
                        return Err(e);
                    }
                }
            }

            let remaining = match deadline_at.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return Err(UpstreamError::RequestTimeout),
            };
            let received = {
                let mut rx = self.idle_rx.lock().await;
                tokio::time::timeout(remaining, rx.recv()).await
            };
            match received {
                Err(_elapsed) => return Err(UpstreamError::RequestTimeout),
                Ok(None) => return Err(UpstreamError::PoolClosed),
                Ok(Some(session)) => return self.check_out(session).await,
            }
        }
    }

    /// Applies the idle liveness check to a session leaving the pool.
    async fn check_out(&self, mut session: WsSession) -> Result<WsSession, UpstreamError> {
        if session.idle_for() <= self.config.ping_interval {
            return Ok(session);
        }
        if session.probe(self.config.ping_timeout).await {
            return Ok(session);
        }

        debug!(url = %self.url, "idle websocket session failed liveness probe, replacing");
        session.close().await;
        match WsSession::connect(&self.url).await {
            Ok(fresh) => Ok(fresh),
            Err(e) => {
                *self.active.lock() -= 1;
                Err(e)
            }
        }
    }

    /// Returns a session to the pool.
    ///
    /// Broken sessions are closed; healthy ones go back on the idle channel
    /// unless the pool is full or closed, in which case they are closed and
    /// the active count drops.
    pub async fn release(&self, session: WsSession) {
        if session.is_broken() || self.closed.load(Ordering::Acquire) {
            *self.active.lock() -= 1;
            session.close().await;
            return;
        }

        match self.idle_tx.try_send(session) {
            Ok(()) => {}
            Err(TrySendError::Full(session)) | Err(TrySendError::Closed(session)) => {
                *self.active.lock() -= 1;
                session.close().await;
            }
        }
    }

    /// Drains and closes every idle session; subsequent `acquire` fails.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);

        let mut rx = self.idle_rx.lock().await;
        rx.close();
        while let Ok(session) = rx.try_recv() {
            *self.active.lock() -= 1;
            session.close().await;
        }
    }
}
