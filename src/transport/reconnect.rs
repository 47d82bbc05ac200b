//! Reconnect-on-failure wrapper around a TCP or serial line backend,
//! grounded in `frappy/lib/asynconn.py`'s reconnect handling, using a
//! cancellation token for graceful shutdown rather than a dedicated
//! quit-flag.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{LineTransport, TcpLineTransport};
use crate::errors::{Result, SecopError};

/// Which concrete backend a `uri` resolves to (spec §4.8: `tcp://` and
/// `serial://` schemes).
enum Backend {
    Tcp(String),
    #[cfg(feature = "serial")]
    Serial(super::serial::SerialConfig),
}

impl Backend {
    fn parse(uri: &str) -> Result<Self> {
        if uri.starts_with("serial://") {
            #[cfg(feature = "serial")]
            {
                return Ok(Backend::Serial(super::serial::SerialConfig::parse(uri)?));
            }
            #[cfg(not(feature = "serial"))]
            {
                return Err(SecopError::ConfigError(
                    "serial:// uris require the \"serial\" feature".to_string(),
                ));
            }
        }
        let addr = uri.strip_prefix("tcp://").unwrap_or(uri);
        Ok(Backend::Tcp(addr.to_string()))
    }

    async fn connect(&self, read_timeout: Duration) -> Result<Arc<dyn LineTransport>> {
        match self {
            Backend::Tcp(addr) => Ok(Arc::new(TcpLineTransport::connect(addr, read_timeout).await?)),
            #[cfg(feature = "serial")]
            Backend::Serial(cfg) => Ok(Arc::new(super::serial::SerialLineTransport::connect(cfg, read_timeout).await?)),
        }
    }
}

pub struct ReconnectingLineTransport {
    uri: String,
    backend: Backend,
    read_timeout: Duration,
    /// Minimum gap between consecutive reconnect attempts (spec §4.8
    /// "throttled retries").
    retry_throttle: Duration,
    inner: RwLock<Option<Arc<dyn LineTransport>>>,
    last_attempt: RwLock<Option<Instant>>,
    /// Text of the last connect failure actually logged, so repeated
    /// identical failures don't spam the log (spec §4.8: "between attempts
    /// logs only new error text, deduplicated by string").
    last_logged_error: RwLock<Option<String>>,
    cancel: CancellationToken,
}

impl ReconnectingLineTransport {
    /// `uri` is `tcp://host:port`, a bare `host:port` (treated as `tcp://`),
    /// or `serial://device?opt=val&...` (requires the `serial` feature).
    pub fn new(uri: impl Into<String>, read_timeout: Duration, retry_throttle: Duration) -> Result<Self> {
        let uri = uri.into();
        let backend = Backend::parse(&uri)?;
        Ok(ReconnectingLineTransport {
            uri,
            backend,
            read_timeout,
            retry_throttle,
            inner: RwLock::new(None),
            last_attempt: RwLock::new(None),
            last_logged_error: RwLock::new(None),
            cancel: CancellationToken::new(),
        })
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn current(&self) -> Option<Arc<dyn LineTransport>> {
        self.inner.read().await.clone()
    }

    async fn drop_connection(&self) {
        *self.inner.write().await = None;
    }

    /// Logs a connect failure only if its text differs from the last one
    /// logged (frappy `SecopClient._reconnect`: `if txt != self._last_error`).
    async fn log_connect_error(&self, e: &SecopError) {
        let text = e.message().to_string();
        let mut last = self.last_logged_error.write().await;
        if last.as_deref() == Some(text.as_str()) {
            debug!(uri = %self.uri, error = %text, "reconnect still failing");
            return;
        }
        warn!(uri = %self.uri, error = %text, "reconnect failed");
        *last = Some(text);
    }

    /// Connects if not already connected, subject to `retry_throttle`; a
    /// throttled call with no live connection returns `CommunicationFailed`
    /// without attempting the socket connect (frappy: don't hammer a dead
    /// peer every poll tick).
    async fn ensure_connected(&self) -> Result<Arc<dyn LineTransport>> {
        if let Some(conn) = self.current().await {
            return Ok(conn);
        }
        {
            let mut last = self.last_attempt.write().await;
            if let Some(t) = *last {
                if t.elapsed() < self.retry_throttle {
                    return Err(SecopError::CommunicationFailedSilent(
                        "reconnect throttled".to_string(),
                    ));
                }
            }
            *last = Some(Instant::now());
        }
        match self.backend.connect(self.read_timeout).await {
            Ok(conn) => {
                *self.inner.write().await = Some(conn.clone());
                *self.last_logged_error.write().await = None;
                Ok(conn)
            },
            Err(e) => {
                self.log_connect_error(&e).await;
                Err(e)
            },
        }
    }

    /// Spawns the background task that keeps the connection alive by
    /// pinging on idle (spec §4.8 heartbeat: "if the receive side sees no
    /// line for N ticks of 1s, send a liveness probe").
    pub fn spawn_heartbeat(self: &Arc<Self>, probe: impl Into<String>, idle_ticks: u32) {
        let this = self.clone();
        let probe = probe.into();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            let mut idle = 0u32;
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        idle += 1;
                        if idle >= idle_ticks {
                            idle = 0;
                            let _ = this.write_line(&probe).await;
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl LineTransport for ReconnectingLineTransport {
    async fn write_line(&self, line: &str) -> Result<()> {
        let conn = self.ensure_connected().await?;
        match conn.write_line(line).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.drop_connection().await;
                Err(e)
            },
        }
    }

    async fn read_line(&self) -> Result<String> {
        let conn = self.ensure_connected().await?;
        match conn.read_line().await {
            Ok(line) => Ok(line),
            Err(e) if e.is_silent() => Err(e),
            Err(e) => {
                self.drop_connection().await;
                Err(e)
            },
        }
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
        if let Some(conn) = self.current().await {
            conn.disconnect().await;
        }
        self.drop_connection().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_connected_fails_fast_without_live_peer() {
        let t = ReconnectingLineTransport::new("127.0.0.1:1", Duration::from_millis(50), Duration::from_secs(30)).unwrap();
        assert!(t.write_line("hi").await.is_err());
    }

    #[tokio::test]
    async fn repeated_attempts_are_throttled() {
        let t = ReconnectingLineTransport::new("127.0.0.1:1", Duration::from_millis(50), Duration::from_secs(30)).unwrap();
        let first = t.write_line("hi").await;
        let second = t.write_line("hi").await;
        assert!(first.is_err());
        match second {
            Err(e) => assert!(e.is_silent(), "second attempt within the throttle window must be silent"),
            Ok(()) => panic!("unexpected success against a closed port"),
        }
    }

    #[tokio::test]
    async fn bare_host_port_is_treated_as_tcp() {
        let t = ReconnectingLineTransport::new("127.0.0.1:1", Duration::from_millis(50), Duration::from_secs(30)).unwrap();
        assert!(matches!(t.backend, Backend::Tcp(_)));
    }

    #[cfg(not(feature = "serial"))]
    #[test]
    fn serial_uri_without_feature_is_a_config_error() {
        let t = ReconnectingLineTransport::new("serial:///dev/ttyUSB0", Duration::from_millis(50), Duration::from_secs(30));
        assert!(matches!(t, Err(SecopError::ConfigError(_))));
    }
}
