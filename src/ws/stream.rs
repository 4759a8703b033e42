//! Merges a table's CDC fan-out with a heartbeat, retrying the fan-out side
//! with exponential backoff (spec §4.8 bullets 3-4).

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures_util::Stream;

use crate::cdc::fanout::FanoutRegistry;
use crate::cdc::CdcEvent;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// One item yielded to a live `T_changes` subscription.
pub enum Tick {
    Change(CdcEvent),
    /// The keep-alive `HEARTBEAT` operation with null data (§4.8).
    Heartbeat,
}

/// Subscribes to `table`'s fan-out and yields [`Tick::Change`] for every
/// decoded event, interleaved with a [`Tick::Heartbeat`] every 30 seconds.
/// If the fan-out subscription closes (the sink's sender was dropped), it is
/// re-established after an exponential backoff starting at 1s and capped at
/// 30s, so a transient CDC outage surfaces as a gap, not a terminated
/// client subscription.
pub fn subscribe_with_heartbeat(
    fanout: Arc<FanoutRegistry>,
    table: String,
) -> impl Stream<Item = Tick> {
    stream! {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            let mut sub = fanout.subscribe(&table);
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await; // first tick fires immediately; discard it

            loop {
                tokio::select! {
                    event = sub.recv() => {
                        match event {
                            Some(event) => {
                                backoff = INITIAL_BACKOFF;
                                yield Tick::Change(event);
                            }
                            None => break, // sink closed; resubscribe below
                        }
                    }
                    _ = heartbeat.tick() => {
                        yield Tick::Heartbeat;
                    }
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}
