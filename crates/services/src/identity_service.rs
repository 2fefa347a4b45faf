use std::sync::Arc;

use room_core::model::LearnerId;
use storage::repository::{IdentityRepository, StorageError};
use tracing::info;

/// Hands out the learner identity of this install: created once, then remembered.
#[derive(Clone)]
pub struct IdentityService {
    identities: Arc<dyn IdentityRepository>,
}

impl IdentityService {
    #[must_use]
    pub fn new(identities: Arc<dyn IdentityRepository>) -> Self {
        Self { identities }
    }

    /// Load the stored identity, generating and storing a fresh one on first use.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the local store cannot be read or written.
    pub async fn ensure(&self) -> Result<LearnerId, StorageError> {
        if let Some(existing) = self.identities.load_identity().await? {
            return Ok(existing);
        }
        let fresh = LearnerId::generate();
        self.identities.save_identity(&fresh).await?;
        info!(identity = %fresh, "created learner identity");
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::repository::InMemoryRepository;

    #[tokio::test]
    async fn identity_is_created_once() {
        let service = IdentityService::new(Arc::new(InMemoryRepository::new()));
        let first = service.ensure().await.unwrap();
        let second = service.ensure().await.unwrap();
        assert_eq!(first, second);
    }
}
