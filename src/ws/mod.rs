//! C9 — WebSocket Handler (spec §4.8).
//!
//! Wire-level `graphql-transport-ws` framing (`connection_init`/`ack`,
//! `ping`/`pong`, `subscribe`/`complete`, server `next`/`error`/`complete`)
//! is delegated to `async-graphql-axum`'s `GraphQLSubscription` service,
//! mounted in `crate::server`. What is specific to this gateway — merging a
//! table's fan-out with a heartbeat, and retrying the fan-out subscription
//! with backoff — lives here and is consumed by the `T_changes` field
//! resolvers built in `crate::schema::generator`.

pub mod stream;

pub use stream::{subscribe_with_heartbeat, Tick};
