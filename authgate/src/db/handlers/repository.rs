//! Base repository trait for database operations.

use crate::db::errors::Result;

/// Common operations of a table-backed repository.
///
/// Create requests, filters and responses are separate associated types, so a repository
/// can accept a different shape than it returns.
#[async_trait::async_trait]
pub trait Repository {
    /// The request type for creating entities
    type CreateRequest;

    /// The response type returned by operations
    type Response;

    /// The identifier type for lookups
    type Id: Send + Sync;

    /// The filter type for list operations
    type Filter: Send + Sync;

    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response>;

    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>>;

    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>>;

    /// Delete an entity by ID. Returns whether a row was removed.
    async fn delete(&mut self, id: Self::Id) -> Result<bool>;
}
