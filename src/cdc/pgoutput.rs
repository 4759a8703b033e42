//! Wire decoder for the `pgoutput` logical replication protocol (spec §4.6
//! "Decoding rules"). PostgreSQL does not document this as a stable public
//! crate-level API, so the byte layout here is read directly off the
//! protocol rules: message tag, then fixed fields in network (big-endian)
//! byte order, then TupleData for row-carrying messages.

use std::collections::HashMap;

use crate::cdc::{CdcEvent, RelationInfo};
use crate::common::Value;
use crate::error::{GatewayError, Result};

/// Microseconds between the Unix epoch and the PostgreSQL epoch
/// (2000-01-01 00:00:00 UTC), used to convert pgoutput timestamps.
const PG_EPOCH_OFFSET_MICROS: i64 = 946_684_800_000_000;

/// Per-connection decoder state. A RELATION message only arrives once per
/// table per connection lifetime; every INSERT/UPDATE/DELETE after it
/// refers back to the cached column list by relation id.
#[derive(Default)]
pub struct Decoder {
    relations: HashMap<u32, RelationInfo>,
    /// WAL position of the XLogData frame currently being decoded, set by
    /// the caller from the streaming-replication envelope before each
    /// `decode` call so row events can carry their LSN (spec §4.6).
    last_lsn: u64,
    /// Commit timestamp of the transaction currently open, taken off its
    /// BEGIN message. pgoutput only carries a timestamp at transaction
    /// granularity, so every row event between a BEGIN and its COMMIT
    /// reports this same value (spec §4.3 `T_ChangeEvent.timestamp`).
    last_timestamp: i64,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn relation(&self, relation_id: u32) -> Option<&RelationInfo> {
        self.relations.get(&relation_id)
    }

    /// Records the WAL start position of the frame about to be decoded.
    pub fn set_lsn(&mut self, lsn: u64) {
        self.last_lsn = lsn;
    }

    /// Decodes one pgoutput message. Returns `Ok(None)` for messages this
    /// gateway has no use for (ORIGIN, TYPE, TRUNCATE) or for a row message
    /// whose relation id was never announced — the latter is logged by the
    /// caller and skipped rather than treated as fatal (§4.6 edge case).
    pub fn decode(&mut self, data: &[u8]) -> Result<Option<CdcEvent>> {
        let mut cur = Cursor::new(data);
        let tag = cur.read_u8()?;
        match tag {
            b'B' => self.decode_begin(&mut cur).map(Some),
            b'C' => self.decode_commit(&mut cur).map(Some),
            b'R' => self.decode_relation(&mut cur).map(Some),
            b'I' => self.decode_insert(&mut cur),
            b'U' => self.decode_update(&mut cur),
            b'D' => self.decode_delete(&mut cur),
            b'O' | b'Y' | b'T' => Ok(None),
            other => Err(GatewayError::Subscription(format!(
                "unrecognized pgoutput message tag {other:#x}"
            ))),
        }
    }

    fn decode_begin(&mut self, cur: &mut Cursor) -> Result<CdcEvent> {
        let lsn = cur.read_u64()?;
        let timestamp = pg_timestamp_to_unix_micros(cur.read_i64()?);
        let xid = cur.read_u32()?;
        self.last_timestamp = timestamp;
        Ok(CdcEvent::Begin { lsn, timestamp, xid })
    }

    fn decode_commit(&mut self, cur: &mut Cursor) -> Result<CdcEvent> {
        let _flags = cur.read_u8()?;
        let _commit_lsn = cur.read_u64()?;
        let end_lsn = cur.read_u64()?;
        let timestamp = pg_timestamp_to_unix_micros(cur.read_i64()?);
        Ok(CdcEvent::Commit { lsn: end_lsn, timestamp })
    }

    fn decode_relation(&mut self, cur: &mut Cursor) -> Result<CdcEvent> {
        let relation_id = cur.read_u32()?;
        let schema = cur.read_cstr()?;
        let table = cur.read_cstr()?;
        let _replica_identity = cur.read_u8()?;
        let num_columns = cur.read_u16()?;
        let mut columns = Vec::with_capacity(num_columns as usize);
        for _ in 0..num_columns {
            let _flags = cur.read_u8()?;
            let name = cur.read_cstr()?;
            let _type_oid = cur.read_u32()?;
            let _type_modifier = cur.read_i32()?;
            columns.push(name);
        }
        self.relations.insert(
            relation_id,
            RelationInfo { schema: schema.clone(), table: table.clone(), columns },
        );
        Ok(CdcEvent::Relation { relation_id, schema, table })
    }

    fn decode_insert(&mut self, cur: &mut Cursor) -> Result<Option<CdcEvent>> {
        let relation_id = cur.read_u32()?;
        let Some(relation) = self.relations.get(&relation_id).cloned() else {
            return Ok(None);
        };
        let marker = cur.read_u8()?;
        if marker != b'N' {
            return Err(GatewayError::Subscription(format!(
                "expected 'N' tuple marker in INSERT, got {marker:#x}"
            )));
        }
        let row = read_tuple(cur, &relation.columns)?;
        Ok(Some(CdcEvent::Insert {
            lsn: self.last_lsn,
            timestamp: self.last_timestamp,
            schema: relation.schema,
            table: relation.table,
            row,
        }))
    }

    fn decode_update(&mut self, cur: &mut Cursor) -> Result<Option<CdcEvent>> {
        let relation_id = cur.read_u32()?;
        let Some(relation) = self.relations.get(&relation_id).cloned() else {
            return Ok(None);
        };
        let mut marker = cur.read_u8()?;
        let mut old = None;
        if marker == b'K' || marker == b'O' {
            old = Some(read_tuple(cur, &relation.columns)?);
            marker = cur.read_u8()?;
        }
        if marker != b'N' {
            return Err(GatewayError::Subscription(format!(
                "expected 'N' tuple marker in UPDATE, got {marker:#x}"
            )));
        }
        let row = read_tuple(cur, &relation.columns)?;
        Ok(Some(CdcEvent::Update {
            lsn: self.last_lsn,
            timestamp: self.last_timestamp,
            schema: relation.schema,
            table: relation.table,
            old,
            row,
        }))
    }

    fn decode_delete(&mut self, cur: &mut Cursor) -> Result<Option<CdcEvent>> {
        let relation_id = cur.read_u32()?;
        let Some(relation) = self.relations.get(&relation_id).cloned() else {
            return Ok(None);
        };
        let marker = cur.read_u8()?;
        if marker != b'K' && marker != b'O' {
            return Err(GatewayError::Subscription(format!(
                "expected 'K' or 'O' tuple marker in DELETE, got {marker:#x}"
            )));
        }
        let row = read_tuple(cur, &relation.columns)?;
        Ok(Some(CdcEvent::Delete {
            lsn: self.last_lsn,
            timestamp: self.last_timestamp,
            schema: relation.schema,
            table: relation.table,
            row,
        }))
    }
}

fn read_tuple(cur: &mut Cursor, columns: &[String]) -> Result<Vec<(String, Value)>> {
    let num_columns = cur.read_u16()?;
    let mut row = Vec::with_capacity(num_columns as usize);
    for i in 0..num_columns as usize {
        let kind = cur.read_u8()?;
        let name = columns.get(i).cloned().unwrap_or_else(|| format!("column_{i}"));
        let value = match kind {
            b'n' => Value::Null,
            b'u' => continue, // TOASTed and unchanged; omit rather than guess a value.
            b't' => {
                let len = cur.read_u32()? as usize;
                let bytes = cur.read_bytes(len)?;
                Value::Text(String::from_utf8_lossy(bytes).into_owned())
            }
            other => {
                return Err(GatewayError::Subscription(format!(
                    "unrecognized tuple column kind {other:#x}"
                )))
            }
        };
        row.push((name, value));
    }
    Ok(row)
}

fn pg_timestamp_to_unix_micros(pg_micros: i64) -> i64 {
    pg_micros + PG_EPOCH_OFFSET_MICROS
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(GatewayError::Subscription("truncated pgoutput message".into()));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_bytes(2)?.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }

    fn read_cstr(&mut self) -> Result<String> {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != 0 {
            self.pos += 1;
        }
        if self.pos >= self.data.len() {
            return Err(GatewayError::Subscription("unterminated string in pgoutput message".into()));
        }
        let s = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
        self.pos += 1; // skip the null terminator
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation_message() -> Vec<u8> {
        let mut m = vec![b'R'];
        m.extend_from_slice(&1u32.to_be_bytes()); // relation_id
        m.extend_from_slice(b"public\0");
        m.extend_from_slice(b"orders\0");
        m.push(b'd'); // replica identity: default
        m.extend_from_slice(&2u16.to_be_bytes()); // num columns
        m.push(1); // flags: key column
        m.extend_from_slice(b"id\0");
        m.extend_from_slice(&23u32.to_be_bytes()); // int4 oid
        m.extend_from_slice(&(-1i32).to_be_bytes());
        m.push(0);
        m.extend_from_slice(b"status\0");
        m.extend_from_slice(&25u32.to_be_bytes()); // text oid
        m.extend_from_slice(&(-1i32).to_be_bytes());
        m
    }

    fn insert_message() -> Vec<u8> {
        let mut m = vec![b'I'];
        m.extend_from_slice(&1u32.to_be_bytes());
        m.push(b'N');
        m.extend_from_slice(&2u16.to_be_bytes());
        m.push(b't');
        m.extend_from_slice(&1u32.to_be_bytes());
        m.push(b'1');
        m.push(b't');
        m.extend_from_slice(&4u32.to_be_bytes());
        m.extend_from_slice(b"open");
        m
    }

    #[test]
    fn decodes_relation_then_insert() {
        let mut decoder = Decoder::new();
        let event = decoder.decode(&relation_message()).unwrap().unwrap();
        assert!(matches!(event, CdcEvent::Relation { relation_id: 1, .. }));

        let event = decoder.decode(&insert_message()).unwrap().unwrap();
        match event {
            CdcEvent::Insert { schema, table, row, .. } => {
                assert_eq!(schema, "public");
                assert_eq!(table, "orders");
                assert_eq!(row[0], ("id".to_string(), Value::Text("1".into())));
                assert_eq!(row[1], ("status".to_string(), Value::Text("open".into())));
            }
            other => panic!("expected Insert, got {other:?}"),
        }
    }

    #[test]
    fn insert_referencing_unknown_relation_is_skipped() {
        let mut decoder = Decoder::new();
        assert!(decoder.decode(&insert_message()).unwrap().is_none());
    }

    #[test]
    fn null_column_decodes_to_null_value() {
        let mut decoder = Decoder::new();
        decoder.decode(&relation_message()).unwrap();
        let mut m = vec![b'I'];
        m.extend_from_slice(&1u32.to_be_bytes());
        m.push(b'N');
        m.extend_from_slice(&2u16.to_be_bytes());
        m.push(b'n');
        m.push(b't');
        m.extend_from_slice(&4u32.to_be_bytes());
        m.extend_from_slice(b"open");
        let event = decoder.decode(&m).unwrap().unwrap();
        match event {
            CdcEvent::Insert { row, .. } => {
                assert_eq!(row[0], ("id".to_string(), Value::Null));
            }
            other => panic!("expected Insert, got {other:?}"),
        }
    }
}
