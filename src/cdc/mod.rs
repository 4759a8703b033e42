//! C7/C8 — CDC Listener and Fan-out (spec §4.6/§4.7).
//!
//! A logical-replication connection is exclusive to [`listener::Listener`];
//! decoded events are pushed into [`fanout::FanoutRegistry`], which holds
//! one multicast sink per table. The WebSocket layer (`crate::ws`) merges a
//! per-table subscription onto these sinks with a heartbeat.

pub mod fanout;
pub mod listener;
pub mod pgoutput;

use serde::{Deserialize, Serialize};

use crate::common::Value;

/// One decoded pgoutput message, keyed by operation (spec §3 "CDC Event").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CdcEvent {
    Begin { lsn: u64, timestamp: i64, xid: u32 },
    Commit { lsn: u64, timestamp: i64 },
    Relation { relation_id: u32, schema: String, table: String },
    Insert { lsn: u64, timestamp: i64, schema: String, table: String, row: Vec<(String, Value)> },
    Update {
        lsn: u64,
        timestamp: i64,
        schema: String,
        table: String,
        old: Option<Vec<(String, Value)>>,
        row: Vec<(String, Value)>,
    },
    Delete { lsn: u64, timestamp: i64, schema: String, table: String, row: Vec<(String, Value)> },
}

impl CdcEvent {
    /// The table this event concerns, if any (BEGIN/COMMIT carry none).
    pub fn table(&self) -> Option<&str> {
        match self {
            CdcEvent::Relation { table, .. }
            | CdcEvent::Insert { table, .. }
            | CdcEvent::Update { table, .. }
            | CdcEvent::Delete { table, .. } => Some(table),
            CdcEvent::Begin { .. } | CdcEvent::Commit { .. } => None,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            CdcEvent::Begin { .. } => "BEGIN",
            CdcEvent::Commit { .. } => "COMMIT",
            CdcEvent::Relation { .. } => "RELATION",
            CdcEvent::Insert { .. } => "INSERT",
            CdcEvent::Update { .. } => "UPDATE",
            CdcEvent::Delete { .. } => "DELETE",
        }
    }

    pub fn lsn(&self) -> Option<u64> {
        match self {
            CdcEvent::Begin { lsn, .. }
            | CdcEvent::Commit { lsn, .. }
            | CdcEvent::Insert { lsn, .. }
            | CdcEvent::Update { lsn, .. }
            | CdcEvent::Delete { lsn, .. } => Some(*lsn),
            CdcEvent::Relation { .. } => None,
        }
    }

    /// Commit timestamp of the owning transaction, in Unix microseconds.
    /// `None` for BEGIN/RELATION, which predate or don't carry one.
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            CdcEvent::Commit { timestamp, .. }
            | CdcEvent::Insert { timestamp, .. }
            | CdcEvent::Update { timestamp, .. }
            | CdcEvent::Delete { timestamp, .. } => Some(*timestamp),
            CdcEvent::Begin { timestamp, .. } => Some(*timestamp),
            CdcEvent::Relation { .. } => None,
        }
    }

    pub fn schema(&self) -> Option<&str> {
        match self {
            CdcEvent::Relation { schema, .. }
            | CdcEvent::Insert { schema, .. }
            | CdcEvent::Update { schema, .. }
            | CdcEvent::Delete { schema, .. } => Some(schema),
            CdcEvent::Begin { .. } | CdcEvent::Commit { .. } => None,
        }
    }

    /// The row's current column values, for row-carrying events (spec §4.3
    /// `T_SubscriptionData`).
    pub fn row(&self) -> Option<&[(String, Value)]> {
        match self {
            CdcEvent::Insert { row, .. } | CdcEvent::Update { row, .. } | CdcEvent::Delete { row, .. } => Some(row),
            CdcEvent::Begin { .. } | CdcEvent::Commit { .. } | CdcEvent::Relation { .. } => None,
        }
    }
}

/// Column metadata learned from a RELATION message, keyed by relation id
/// (spec §3 "RelationCache").
#[derive(Debug, Clone)]
pub struct RelationInfo {
    pub schema: String,
    pub table: String,
    pub columns: Vec<String>,
}
