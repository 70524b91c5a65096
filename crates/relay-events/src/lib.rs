//! Real-time event router: four priority-lane queues feeding kind-keyed
//! handlers, with retry-with-demotion on failure and a TTL result cache.

pub mod cache;
pub mod error;
pub mod handler;
pub mod model;
pub mod router;

pub use cache::ResultCache;
pub use error::{EventsError, Result};
pub use handler::EventHandler;
pub use model::{CachedEventResult, Event, EventPriority};
pub use router::EventRouter;
