/// Reading sources: where current and historical sensor values come from
pub mod http;
pub mod mock;

use crate::error::SourceError;
use crate::readings::{Reading, Timestamp};
use std::future::Future;
use std::pin::Pin;

pub use http::HttpReadingSource;
pub use mock::MockReadingSource;

/// Boxed future returned by reading source calls
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Trait for anything that can supply readings for a monitored entity
///
/// Implementations must be safe to call concurrently for different entities.
/// Callers bound every call with their own timeout, so implementations do not
/// need to enforce one.
pub trait ReadingSource: Send + Sync {
    /// Most recent reading for an entity
    fn get_current<'a>(&'a self, entity_id: &'a str) -> SourceFuture<'a, Reading>;

    /// Readings captured at or after `since`, in any order
    fn get_history<'a>(&'a self, entity_id: &'a str, since: Timestamp)
        -> SourceFuture<'a, Vec<Reading>>;

    /// When the entity was last actuated (irrigated or refilled), if known
    fn last_actuation<'a>(&'a self, entity_id: &'a str) -> SourceFuture<'a, Option<Timestamp>> {
        let _ = entity_id;
        Box::pin(async { Ok(None) })
    }
}
