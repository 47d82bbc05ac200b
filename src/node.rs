//! The top-level SECoP node: wires the dispatcher, module table and poller
//! together and owns the client-facing TCP listener. The bootstrap flow
//! (load config, build connections, serve) mirrors a typical server-process
//! startup sequence, adapted here to an inbound multi-client SECoP server.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use crate::dispatcher::{DEFAULT_QUEUE_DEPTH, Dispatcher, NodeIdentity};
use crate::module::Module;
use crate::module::lifecycle::{initial_reads, write_init_params};
use crate::poller::ModulePoller;

pub struct SecNode {
    pub dispatcher: Arc<Dispatcher>,
    modules: IndexMap<String, Arc<Module>>,
    poll_intervals: BTreeMap<String, Duration>,
    slow_intervals: BTreeMap<String, Duration>,
    cancel: CancellationToken,
    clock_start: tokio::time::Instant,
}

impl SecNode {
    pub fn new(
        identity: NodeIdentity,
        modules: IndexMap<String, Arc<Module>>,
        poll_intervals: BTreeMap<String, Duration>,
        slow_intervals: BTreeMap<String, Duration>,
    ) -> Self {
        let dispatcher = Dispatcher::new(identity, modules.clone());
        SecNode {
            dispatcher,
            modules,
            poll_intervals,
            slow_intervals,
            cancel: CancellationToken::new(),
            clock_start: tokio::time::Instant::now(),
        }
    }

    fn now(&self) -> f64 {
        self.clock_start.elapsed().as_secs_f64()
    }

    /// Runs `earlyInit`/`initModule`-equivalent startup: pushes configured
    /// defaults to hardware, then performs the one-shot initial reads
    /// (frappy `Module.initialReads`/`writeInitParams`).
    pub async fn start_modules(&self) -> crate::errors::Result<()> {
        let now = self.now();
        for module in self.modules.values() {
            write_init_params(module, now).await?;
            initial_reads(module, now).await?;
        }
        Ok(())
    }

    /// Spawns one poll task per module (spec §4.5); each runs until
    /// `shutdown` is called.
    pub fn spawn_pollers(&self) {
        for (name, module) in &self.modules {
            let interval = self.poll_intervals.get(name).copied().unwrap_or(Duration::from_secs(5));
            let slow_interval = self.slow_intervals.get(name).copied().unwrap_or(Duration::from_secs(15));
            let poller = ModulePoller::new(module.clone(), interval, slow_interval);
            let cancel = self.cancel.clone();
            let clock_start = self.clock_start;
            let span = info_span!("poller", module = %name);
            tokio::spawn(poller.run(cancel, clock_start).instrument(span));
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Accepts SECoP client connections until `shutdown` is called
    /// (spec §3 "dispatcher" accept loop).
    pub async fn serve(self: &Arc<Self>, bind_addr: &str) -> crate::errors::Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| crate::errors::SecopError::Internal(format!("bind {bind_addr}: {e}")))?;
        info!(addr = bind_addr, "SECoP node listening");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = accepted.map_err(|e| crate::errors::SecopError::Internal(format!("accept: {e}")))?;
                    let this = self.clone();
                    let span = info_span!("conn", peer = %peer);
                    tokio::spawn(this.handle_connection(stream).instrument(span));
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: tokio::net::TcpStream) {
        let _ = stream.set_nodelay(true);
        let (read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<String>(DEFAULT_QUEUE_DEPTH);
        let conn_id = self.dispatcher.register_connection(tx.clone());

        let writer_cancel = self.cancel.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    line = rx.recv() => {
                        match line {
                            Some(line) => {
                                if write_half.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                                    break;
                                }
                            },
                            None => break,
                        }
                    }
                }
            }
        });

        let mut reader = BufReader::new(read_half);
        let mut buf = String::new();
        loop {
            buf.clear();
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                read = reader.read_line(&mut buf) => {
                    match read {
                        Ok(0) => break,
                        Ok(_) => {
                            let line = buf.trim_end_matches(['\r', '\n']);
                            if line.is_empty() {
                                continue;
                            }
                            let now = self.clock_start.elapsed().as_secs_f64();
                            // The dispatcher already pushed any broadcast
                            // lines resulting from this request into `tx`
                            // synchronously before returning, so sending the
                            // direct replies afterwards on the same channel
                            // preserves the "update before changed" order
                            // (spec §5).
                            let replies = self.dispatcher.handle_line(conn_id, line, now).await;
                            for reply in replies {
                                if tx.send(reply).await.is_err() {
                                    break;
                                }
                            }
                        },
                        Err(e) => {
                            warn!(error = %e, "connection read failed");
                            break;
                        },
                    }
                }
            }
        }
        self.dispatcher.unregister_connection(conn_id);
        drop(tx);
        let _ = writer.await;
    }
}
