//! C7 — CDC Listener: owns the exclusive logical replication connection and
//! drives the `STOPPED → STARTING → RUNNING → RECONNECTING/STOPPED` state
//! machine (spec §4.6).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use futures_util::{SinkExt, StreamExt};
use tokio_postgres::{NoTls, SimpleQueryMessage};
use tracing::{debug, error, info, warn};

use crate::cdc::fanout::FanoutRegistry;
use crate::cdc::pgoutput::Decoder;
use crate::error::{GatewayError, Result};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Which replication message tag a `CopyData` frame carries (not pgoutput's
/// own tag — this is the outer streaming-replication envelope).
const XLOG_DATA: u8 = b'w';
const PRIMARY_KEEPALIVE: u8 = b'k';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ListenerState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Reconnecting = 3,
}

impl From<u8> for ListenerState {
    fn from(v: u8) -> Self {
        match v {
            1 => ListenerState::Starting,
            2 => ListenerState::Running,
            3 => ListenerState::Reconnecting,
            _ => ListenerState::Stopped,
        }
    }
}

pub struct ListenerConfig {
    /// Connection string for the dedicated replication connection, separate
    /// from the ordinary pool (spec §5 "replication connection is exclusive
    /// to the CDC listener"). Must include `replication=database`.
    pub conninfo: String,
    pub slot_name: String,
    pub publication_name: String,
}

/// Runs the CDC decode loop. `state` is exposed so the server's health
/// surface can report it without locking anything.
pub struct Listener {
    config: ListenerConfig,
    fanout: Arc<FanoutRegistry>,
    state: AtomicU8,
}

impl Listener {
    pub fn new(config: ListenerConfig, fanout: Arc<FanoutRegistry>) -> Arc<Self> {
        Arc::new(Self { config, fanout, state: AtomicU8::new(ListenerState::Stopped as u8) })
    }

    pub fn state(&self) -> ListenerState {
        ListenerState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ListenerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Drives the listener until `shutdown` resolves. Reconnects with
    /// exponential backoff on any IO/SQL error instead of returning.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            if *shutdown.borrow() {
                self.set_state(ListenerState::Stopped);
                return;
            }
            self.set_state(ListenerState::Starting);
            tokio::select! {
                result = self.run_once() => {
                    match result {
                        Ok(()) => {
                            self.set_state(ListenerState::Stopped);
                            return;
                        }
                        Err(err) => {
                            error!(error = %err, "cdc listener error, reconnecting");
                            self.set_state(ListenerState::Reconnecting);
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    self.set_state(ListenerState::Stopped);
                    return;
                }
            }
        }
    }

    /// One connect → stream → (error | shutdown) attempt. `Ok(())` only on a
    /// clean, caller-requested stop.
    async fn run_once(&self) -> Result<()> {
        let (client, connection) =
            tokio_postgres::connect(&self.config.conninfo, NoTls).await.map_err(GatewayError::from)?;
        let connection_handle = tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "replication connection closed");
            }
        });

        self.ensure_publication(&client).await?;
        self.ensure_slot(&client).await?;

        let query = format!(
            "START_REPLICATION SLOT {} LOGICAL 0/0 (proto_version '1', publication_names '{}')",
            self.config.slot_name, self.config.publication_name
        );
        let duplex_stream = client
            .copy_both_simple::<Bytes>(&query)
            .await
            .map_err(GatewayError::from)?;
        tokio::pin!(duplex_stream);

        self.set_state(ListenerState::Running);
        info!(slot = %self.config.slot_name, "cdc listener running");

        let mut decoder = Decoder::new();
        let mut last_lsn: u64 = 0;

        while let Some(frame) = duplex_stream.next().await {
            let mut buf = frame.map_err(GatewayError::from)?;
            if buf.is_empty() {
                continue;
            }
            let tag = buf.get_u8();
            match tag {
                XLOG_DATA => {
                    let wal_start = buf.get_u64();
                    let _wal_end = buf.get_u64();
                    let _send_time = buf.get_i64();
                    last_lsn = wal_start;
                    decoder.set_lsn(last_lsn);
                    match decoder.decode(&buf) {
                        Ok(Some(event)) => self.fanout.publish(event),
                        Ok(None) => debug!("skipped pgoutput message for unknown relation"),
                        Err(err) => warn!(error = %err, "failed to decode pgoutput message"),
                    }
                    self.send_standby_status(&mut duplex_stream, last_lsn, false).await?;
                }
                PRIMARY_KEEPALIVE => {
                    let wal_end = buf.get_u64();
                    let _send_time = buf.get_i64();
                    let reply_requested = buf.get_u8() != 0;
                    last_lsn = last_lsn.max(wal_end);
                    if reply_requested {
                        self.send_standby_status(&mut duplex_stream, last_lsn, true).await?;
                    }
                }
                other => {
                    warn!(tag = other, "unrecognized replication stream message");
                }
            }
        }

        connection_handle.abort();
        Ok(())
    }

    async fn send_standby_status<S>(&self, stream: &mut S, lsn: u64, reply: bool) -> Result<()>
    where
        S: futures_util::Sink<Bytes, Error = tokio_postgres::Error> + Unpin,
    {
        let mut msg = Vec::with_capacity(34);
        msg.push(b'r');
        let lsn_bytes = lsn.to_be_bytes();
        msg.extend_from_slice(&lsn_bytes); // written
        msg.extend_from_slice(&lsn_bytes); // flushed
        msg.extend_from_slice(&lsn_bytes); // applied
        msg.extend_from_slice(&0i64.to_be_bytes()); // client timestamp, unused
        msg.push(if reply { 1 } else { 0 });
        stream.send(Bytes::from(msg)).await.map_err(GatewayError::from)
    }

    async fn ensure_publication(&self, client: &tokio_postgres::Client) -> Result<()> {
        let check = client
            .simple_query(&format!(
                "SELECT 1 FROM pg_publication WHERE pubname = '{}'",
                self.config.publication_name
            ))
            .await
            .map_err(GatewayError::from)?;
        if has_row(&check) {
            return Ok(());
        }
        client
            .simple_query(&format!(
                "CREATE PUBLICATION {} FOR ALL TABLES",
                self.config.publication_name
            ))
            .await
            .map_err(GatewayError::from)?;
        Ok(())
    }

    async fn ensure_slot(&self, client: &tokio_postgres::Client) -> Result<()> {
        let check = client
            .simple_query(&format!(
                "SELECT 1 FROM pg_replication_slots WHERE slot_name = '{}'",
                self.config.slot_name
            ))
            .await
            .map_err(GatewayError::from)?;
        if has_row(&check) {
            return Ok(());
        }
        client
            .simple_query(&format!(
                "CREATE_REPLICATION_SLOT {} LOGICAL pgoutput",
                self.config.slot_name
            ))
            .await
            .map_err(GatewayError::from)?;
        Ok(())
    }
}

fn has_row(rows: &[SimpleQueryMessage]) -> bool {
    rows.iter().any(|m| matches!(m, SimpleQueryMessage::Row(_)))
}
