//! Management of user-scoped collections with a single default entity
//! (addresses and payment methods).
//!
//! The at-most-one-default rule itself is enforced atomically by the
//! [`FlaggedRepository`]; this layer adds ownership checks, validation and
//! timestamps.

use std::sync::Arc;

use chrono::Utc;
use model::{DefaultFlagged, FlaggedDraft, Identity};
use repository::{FlaggedRepository, RepositoryError};
use tracing::{info, instrument};

use crate::ServiceError;

pub struct FlaggedService<T: DefaultFlagged> {
    repo: Arc<dyn FlaggedRepository<T>>,
}

impl<T: DefaultFlagged> FlaggedService<T> {
    pub fn new(repo: Arc<dyn FlaggedRepository<T>>) -> Self {
        Self { repo }
    }

    fn entity_name() -> &'static str {
        T::COLLECTION.entity()
    }

    /// Loads an entity the caller owns.
    async fn owned(&self, identity: &Identity, id: &str) -> Result<T, ServiceError> {
        let entity = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(capitalize(Self::entity_name())))?;
        if !identity.owns(entity.owner()) {
            return Err(ServiceError::Unauthorized);
        }
        Ok(entity)
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn list(&self, identity: &Identity) -> Result<Vec<T>, ServiceError> {
        Ok(self.repo.list(&identity.user_id).await?)
    }

    /// Creates a new entity for the caller. Flagging it default clears the
    /// caller's other defaults in the same atomic write.
    #[instrument(skip(self, identity, draft), fields(user_id = %identity.user_id))]
    pub async fn add<D>(&self, identity: &Identity, draft: D) -> Result<T, ServiceError>
    where
        D: FlaggedDraft<Entity = T>,
    {
        let now = Utc::now();
        let entity = draft.build(model::new_id(), identity.user_id.clone(), now, now);
        entity.validate().map_err(ServiceError::Validation)?;
        self.repo.insert(&entity).await?;
        info!(id = entity.id(), is_default = entity.is_default(), "Created {}", Self::entity_name());
        Ok(entity)
    }

    /// Replaces the client-editable fields of an entity the caller owns.
    #[instrument(skip(self, identity, draft), fields(user_id = %identity.user_id))]
    pub async fn update<D>(&self, identity: &Identity, id: &str, draft: D) -> Result<T, ServiceError>
    where
        D: FlaggedDraft<Entity = T>,
    {
        let existing = self.owned(identity, id).await?;
        let updated = draft.build(
            existing.id().to_string(),
            existing.owner().to_string(),
            existing.created_at(),
            Utc::now(),
        );
        updated.validate().map_err(ServiceError::Validation)?;
        match self.repo.update(&updated).await {
            Ok(()) => Ok(updated),
            Err(RepositoryError::NotFound) => Err(ServiceError::not_found(capitalize(Self::entity_name()))),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn delete(&self, identity: &Identity, id: &str) -> Result<(), ServiceError> {
        self.owned(identity, id).await?;
        if !self.repo.delete(id).await? {
            return Err(ServiceError::not_found(capitalize(Self::entity_name())));
        }
        info!(id, "Deleted {}", Self::entity_name());
        Ok(())
    }

    /// Makes `id` the caller's only default entity.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn set_default(&self, identity: &Identity, id: &str) -> Result<T, ServiceError> {
        self.owned(identity, id).await?;
        self.repo
            .set_default(&identity.user_id, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(capitalize(Self::entity_name())))
    }

    /// The caller's default entity, if any.
    pub async fn find_default(&self, user_id: &str) -> Result<Option<T>, ServiceError> {
        Ok(self.repo.find_default(user_id).await?)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memstore::MemoryStore;
    use model::{Address, AddressDraft, AddressKind, PaymentDetails, PaymentMethod, PaymentMethodDraft, Role};

    fn draft(street: &str, is_default: bool) -> AddressDraft {
        AddressDraft {
            kind: AddressKind::Home,
            name: None,
            street: street.to_string(),
            city: "Springfield".to_string(),
            state: "IL".to_string(),
            zip: "62701".to_string(),
            country: "US".to_string(),
            is_default,
        }
    }

    fn addresses() -> FlaggedService<Address> {
        FlaggedService::new(Arc::new(MemoryStore::new()))
    }

    fn buyer(id: &str) -> Identity {
        Identity::new(id, Role::Buyer)
    }

    fn defaults(list: &[Address]) -> usize {
        list.iter().filter(|a| a.is_default).count()
    }

    #[tokio::test]
    async fn test_adding_default_clears_previous_default() {
        let svc = addresses();
        let me = buyer("u1");
        let first = svc.add(&me, draft("1 Main St", true)).await.unwrap();
        let second = svc.add(&me, draft("2 Main St", true)).await.unwrap();

        let list = svc.list(&me).await.unwrap();
        assert_eq!(defaults(&list), 1);
        assert!(list.iter().any(|a| a.id == second.id && a.is_default));
        assert!(list.iter().any(|a| a.id == first.id && !a.is_default));
    }

    #[tokio::test]
    async fn test_set_default_twice_leaves_one_default() {
        let svc = Arc::new(addresses());
        let me = buyer("u1");
        let a = svc.add(&me, draft("1 Main St", false)).await.unwrap();
        let b = svc.add(&me, draft("2 Main St", false)).await.unwrap();

        let (left, right) = tokio::join!(svc.set_default(&me, &a.id), svc.set_default(&me, &b.id));
        left.unwrap();
        right.unwrap();

        let list = svc.list(&me).await.unwrap();
        assert_eq!(defaults(&list), 1);
    }

    #[tokio::test]
    async fn test_foreign_entities_are_unauthorized() {
        let svc = addresses();
        let owner = buyer("u1");
        let other = buyer("u2");
        let a = svc.add(&owner, draft("1 Main St", false)).await.unwrap();

        assert!(matches!(svc.set_default(&other, &a.id).await, Err(ServiceError::Unauthorized)));
        assert!(matches!(svc.delete(&other, &a.id).await, Err(ServiceError::Unauthorized)));
        assert!(matches!(
            svc.update(&other, &a.id, draft("x", false)).await,
            Err(ServiceError::Unauthorized)
        ));
        assert!(matches!(svc.delete(&owner, "missing").await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_keeps_identity_fields() {
        let svc = addresses();
        let me = buyer("u1");
        let a = svc.add(&me, draft("1 Main St", false)).await.unwrap();
        let updated = svc.update(&me, &a.id, draft("9 Elm St", true)).await.unwrap();

        assert_eq!(updated.id, a.id);
        assert_eq!(updated.created_at, a.created_at);
        assert_eq!(updated.street, "9 Elm St");
        assert_eq!(svc.find_default("u1").await.unwrap().unwrap().id, a.id);
    }

    #[tokio::test]
    async fn test_rejects_invalid_entities() {
        let svc = addresses();
        let me = buyer("u1");
        let err = svc.add(&me, draft("", false)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(msg) if msg.contains("street")));

        let cards: FlaggedService<PaymentMethod> = FlaggedService::new(Arc::new(MemoryStore::new()));
        let bad = PaymentMethodDraft {
            name: "Visa".to_string(),
            details: PaymentDetails::Card {
                last4: "42".to_string(),
                expiry_month: "09".to_string(),
                expiry_year: "2030".to_string(),
                brand: "visa".to_string(),
            },
            is_default: true,
        };
        let err = cards.add(&me, bad).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(msg) if msg.contains("last4")));
    }
}
