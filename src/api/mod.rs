mod graphql;
mod socket;

pub use graphql::GraphqlApi;
pub use socket::{ExtendMessage, Socket, SocketCommand};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{AppResult, Properties};

/// The gateway boundary: named queries/mutations against an assumed schema,
/// room routing-token lifecycle, and the inbound push-message feed.
///
/// `join`/`leave` are fire-and-forget, no acknowledgment is observed.
#[async_trait]
pub trait Api: Send + Sync {
    /// Run a named query; resolves to the envelope's `data` object.
    async fn query(&self, name: &str, parameters: Properties, fields: &str) -> AppResult<Value>;

    /// Run a named mutation; resolves to the envelope's `data` object.
    async fn mutate(&self, name: &str, parameters: Properties, fields: &str) -> AppResult<Value>;

    fn join(&self, room: &str);

    fn leave(&self, room: &str);

    fn messages(&self) -> broadcast::Receiver<ExtendMessage>;
}
