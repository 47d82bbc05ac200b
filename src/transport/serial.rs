//! Serial-line backend for hardware speaking a line protocol over a UART
//! (`serial://device?opt=val&...`, spec §4.8), grounded in
//! `frappy/lib/asynconn.py`'s `AsynSerial` option parsing. Gated behind the
//! `serial` feature since not every deployment has a UART to talk to.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf, split};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_serial::SerialPortBuilderExt;

use super::LineTransport;
use crate::errors::{Result, SecopError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Parsed `serial://device?opt=val&...` connection options, options mirror
/// standard UART settings (spec §4.8).
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub device: String,
    pub baudrate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl SerialConfig {
    /// Parses a `serial://` uri; unlike `AsynSerial::ARG_SEP` this only
    /// accepts `&` as the options separator.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("serial://")
            .ok_or_else(|| SecopError::ConfigError(format!("not a serial:// uri: {uri}")))?;
        let mut parts = rest.splitn(2, '?');
        let device = parts.next().unwrap_or("").to_string();
        if device.is_empty() {
            return Err(SecopError::ConfigError(format!("missing device in {uri}")));
        }
        let mut cfg = SerialConfig { device, baudrate: 9600, data_bits: 8, stop_bits: 1, parity: Parity::None };
        if let Some(query) = parts.next() {
            for kv in query.split('&').filter(|s| !s.is_empty()) {
                let (key, value) =
                    kv.split_once('=').ok_or_else(|| SecopError::ConfigError(format!("{kv} must be key=value")))?;
                match key {
                    "baudrate" => {
                        cfg.baudrate = value
                            .parse()
                            .map_err(|_| SecopError::ConfigError(format!("bad baudrate {value}")))?;
                    },
                    "bytesize" => {
                        cfg.data_bits = value
                            .parse()
                            .map_err(|_| SecopError::ConfigError(format!("bad bytesize {value}")))?;
                    },
                    "stopbits" => {
                        let bits: f64 =
                            value.parse().map_err(|_| SecopError::ConfigError(format!("bad stopbits {value}")))?;
                        cfg.stop_bits = bits as u8;
                    },
                    "parity" => {
                        cfg.parity = match value.to_ascii_lowercase().as_str() {
                            "none" => Parity::None,
                            "odd" => Parity::Odd,
                            "even" => Parity::Even,
                            other => return Err(SecopError::ConfigError(format!("unsupported parity {other}"))),
                        };
                    },
                    _ => {},
                }
            }
        }
        Ok(cfg)
    }
}

pub struct SerialLineTransport {
    reader: Mutex<BufReader<ReadHalf<tokio_serial::SerialStream>>>,
    writer: Mutex<WriteHalf<tokio_serial::SerialStream>>,
    read_timeout: Duration,
}

impl SerialLineTransport {
    pub async fn connect(cfg: &SerialConfig, read_timeout: Duration) -> Result<Self> {
        let data_bits = match cfg.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };
        let stop_bits = if cfg.stop_bits >= 2 { tokio_serial::StopBits::Two } else { tokio_serial::StopBits::One };
        let parity = match cfg.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        };
        let stream = tokio_serial::new(&cfg.device, cfg.baudrate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .open_native_async()
            .map_err(|e| SecopError::CommunicationFailed(format!("open {}: {e}", cfg.device)))?;
        let (r, w) = split(stream);
        Ok(SerialLineTransport { reader: Mutex::new(BufReader::new(r)), writer: Mutex::new(w), read_timeout })
    }
}

#[async_trait]
impl LineTransport for SerialLineTransport {
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

    async fn disconnect(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_with_no_options() {
        let cfg = SerialConfig::parse("serial:///dev/ttyUSB0").unwrap();
        assert_eq!(cfg.device, "/dev/ttyUSB0");
        assert_eq!(cfg.baudrate, 9600);
    }

    #[test]
    fn parses_options() {
        let cfg = SerialConfig::parse("serial:///dev/ttyUSB0?baudrate=115200&bytesize=7&parity=even&stopbits=2").unwrap();
        assert_eq!(cfg.baudrate, 115200);
        assert_eq!(cfg.data_bits, 7);
        assert_eq!(cfg.parity, Parity::Even);
        assert_eq!(cfg.stop_bits, 2);
    }

    #[test]
    fn missing_device_errors() {
        assert!(SerialConfig::parse("serial://?baudrate=9600").is_err());
    }

    #[test]
    fn rejects_non_serial_uri() {
        assert!(SerialConfig::parse("tcp://localhost:10767").is_err());
    }
}
