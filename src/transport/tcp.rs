//! A single, non-reconnecting TCP line connection, grounded in
//! `frappy/lib/asynconn.py`'s `AsynTcp`, using a split-reader/writer TCP
//! connection so reads and writes can be locked independently.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::LineTransport;
use crate::errors::{Result, SecopError};

pub struct TcpLineTransport {
    reader: Mutex<BufReader<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
    read_timeout: Duration,
}

impl TcpLineTransport {
    pub async fn connect(addr: &str, read_timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| SecopError::CommunicationFailed(format!("connect to {addr} failed: {e}")))?;
        let _ = stream.set_nodelay(true);
        let (r, w) = stream.into_split();
        Ok(TcpLineTransport { reader: Mutex::new(BufReader::new(r)), writer: Mutex::new(w), read_timeout })
    }
}

#[async_trait]
impl LineTransport for TcpLineTransport {
    async fn write_line(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| SecopError::CommunicationFailed(format!("write failed: {e}")))?;
        writer.flush().await.map_err(|e| SecopError::CommunicationFailed(format!("flush failed: {e}")))
    }

    async fn read_line(&self) -> Result<String> {
        let mut reader = self.reader.lock().await;
        let mut buf = String::new();
        let read = timeout(self.read_timeout, reader.read_line(&mut buf))
            .await
            .map_err(|_| SecopError::CommunicationFailedSilent("read timed out".to_string()))?
            .map_err(|e| SecopError::CommunicationFailed(format!("read failed: {e}")))?;
        if read == 0 {
            return Err(SecopError::CommunicationFailed("peer closed connection".to_string()));
        }
        Ok(buf.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn disconnect(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}
