//! Event handler abstraction: the dispatch target for a given event kind.

use async_trait::async_trait;
use serde_json::Value;

use crate::model::Event;

/// Handles every event of one `kind`. Implementations do the actual work
/// (e.g. reacting to a new meeting, a cancelled item, user feedback) and
/// return either a result payload or an error string; the router takes care
/// of retry-with-demotion and result caching around the call.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn kind(&self) -> &str;

    async fn handle(&self, event: &Event) -> std::result::Result<Value, String>;
}
