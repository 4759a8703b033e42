//! Decodes a realistic BEGIN/RELATION/INSERT/UPDATE/DELETE/COMMIT sequence
//! the way the replication connection in `cdc::listener` would hand bytes
//! to `cdc::pgoutput::Decoder` frame by frame (spec §4.6 Decoding rules).

use pg_graphkit::cdc::pgoutput::Decoder;
use pg_graphkit::cdc::CdcEvent;
use pg_graphkit::common::Value;

const RELATION_ID: u32 = 7;

fn begin_message(lsn: u64, pg_micros: i64, xid: u32) -> Vec<u8> {
    let mut m = vec![b'B'];
    m.extend_from_slice(&lsn.to_be_bytes());
    m.extend_from_slice(&pg_micros.to_be_bytes());
    m.extend_from_slice(&xid.to_be_bytes());
    m
}

fn commit_message(commit_lsn: u64, end_lsn: u64, pg_micros: i64) -> Vec<u8> {
    let mut m = vec![b'C', 0u8];
    m.extend_from_slice(&commit_lsn.to_be_bytes());
    m.extend_from_slice(&end_lsn.to_be_bytes());
    m.extend_from_slice(&pg_micros.to_be_bytes());
    m
}

fn relation_message(columns: &[&str]) -> Vec<u8> {
    let mut m = vec![b'R'];
    m.extend_from_slice(&RELATION_ID.to_be_bytes());
    m.extend_from_slice(b"public\0");
    m.extend_from_slice(b"customers\0");
    m.push(b'd'); // replica identity
    m.extend_from_slice(&(columns.len() as u16).to_be_bytes());
    for col in columns {
        m.push(0); // flags
        m.extend_from_slice(col.as_bytes());
        m.push(0);
        m.extend_from_slice(&0u32.to_be_bytes()); // type oid
        m.extend_from_slice(&(-1i32).to_be_bytes()); // type modifier
    }
    m
}

fn tuple_bytes(values: &[Option<&str>]) -> Vec<u8> {
    let mut m = Vec::new();
    m.extend_from_slice(&(values.len() as u16).to_be_bytes());
    for v in values {
        match v {
            None => m.push(b'n'),
            Some(text) => {
                m.push(b't');
                m.extend_from_slice(&(text.len() as u32).to_be_bytes());
                m.extend_from_slice(text.as_bytes());
            }
        }
    }
    m
}

fn insert_message(values: &[Option<&str>]) -> Vec<u8> {
    let mut m = vec![b'I'];
    m.extend_from_slice(&RELATION_ID.to_be_bytes());
    m.push(b'N');
    m.extend(tuple_bytes(values));
    m
}

fn update_message(old: &[Option<&str>], new: &[Option<&str>]) -> Vec<u8> {
    let mut m = vec![b'U'];
    m.extend_from_slice(&RELATION_ID.to_be_bytes());
    m.push(b'O');
    m.extend(tuple_bytes(old));
    m.push(b'N');
    m.extend(tuple_bytes(new));
    m
}

fn delete_message(key: &[Option<&str>]) -> Vec<u8> {
    let mut m = vec![b'D'];
    m.extend_from_slice(&RELATION_ID.to_be_bytes());
    m.push(b'K');
    m.extend(tuple_bytes(key));
    m
}

#[test]
fn decodes_a_full_transaction_in_order() {
    let mut decoder = Decoder::new();

    match decoder.decode(&begin_message(100, 0, 555)).unwrap().unwrap() {
        CdcEvent::Begin { lsn, xid, .. } => {
            assert_eq!(lsn, 100);
            assert_eq!(xid, 555);
        }
        other => panic!("expected Begin, got {other:?}"),
    }

    match decoder.decode(&relation_message(&["id", "name"])).unwrap().unwrap() {
        CdcEvent::Relation { relation_id, table, .. } => {
            assert_eq!(relation_id, RELATION_ID);
            assert_eq!(table, "customers");
        }
        other => panic!("expected Relation, got {other:?}"),
    }
    assert!(decoder.relation(RELATION_ID).is_some());

    decoder.set_lsn(101);
    match decoder.decode(&insert_message(&[Some("1"), Some("Ada")])).unwrap().unwrap() {
        CdcEvent::Insert { row, table, .. } => {
            assert_eq!(table, "customers");
            assert_eq!(row, vec![("id".to_string(), Value::Text("1".to_string())), ("name".to_string(), Value::Text("Ada".to_string()))]);
        }
        other => panic!("expected Insert, got {other:?}"),
    }

    decoder.set_lsn(102);
    match decoder.decode(&update_message(&[Some("1"), Some("Ada")], &[Some("1"), Some("Ada Lovelace")])).unwrap().unwrap() {
        CdcEvent::Update { old, row, .. } => {
            assert!(old.is_some());
            assert_eq!(row[1], ("name".to_string(), Value::Text("Ada Lovelace".to_string())));
        }
        other => panic!("expected Update, got {other:?}"),
    }

    decoder.set_lsn(103);
    match decoder.decode(&delete_message(&[Some("1"), None])).unwrap().unwrap() {
        CdcEvent::Delete { row, .. } => {
            assert_eq!(row[0], ("id".to_string(), Value::Text("1".to_string())));
            assert_eq!(row[1], ("name".to_string(), Value::Null));
        }
        other => panic!("expected Delete, got {other:?}"),
    }

    match decoder.decode(&commit_message(103, 104, 0)).unwrap().unwrap() {
        CdcEvent::Commit { lsn, .. } => assert_eq!(lsn, 104),
        other => panic!("expected Commit, got {other:?}"),
    }
}

#[test]
fn a_row_event_for_an_unannounced_relation_is_skipped_not_fatal() {
    let mut decoder = Decoder::new();
    let result = decoder.decode(&insert_message(&[Some("1")])).unwrap();
    assert!(result.is_none());
}

#[test]
fn an_unrecognized_message_tag_is_an_error() {
    let mut decoder = Decoder::new();
    let result = decoder.decode(&[b'Z', 0, 0, 0]);
    assert!(result.is_err());
}
