use async_trait::async_trait;

use crate::SyncResult;

/// REST collaborator for one entity type. Every call returns the authoritative
/// server representation, which the caller feeds back into the owning store.
#[async_trait]
pub trait Service<T, Id, Scope>: Send + Sync
where
    T: Send + Sync + 'static,
    Id: Send + 'static,
    Scope: Send + 'static,
{
    async fn list(&self, scope: Scope) -> SyncResult<Vec<T>>;
    async fn create(&self, entity: T) -> SyncResult<T>;
    async fn update(&self, id: Id, entity: T) -> SyncResult<T>;
    async fn delete(&self, id: Id) -> SyncResult<()>;
}
