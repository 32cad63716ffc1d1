//! In-memory customer repository

use async_trait::async_trait;

use tariff_types::{Customer, CustomerId};

use super::{apply_limit, MemoryStore};
use crate::error::DbResult;
use crate::repo::{CustomerRepository, ListFilter};

/// In-memory customer repository with optimistic versioning
#[derive(Clone)]
pub struct MemoryCustomerRepository {
    store: MemoryStore,
}

impl MemoryCustomerRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CustomerRepository for MemoryCustomerRepository {
    async fn save(&self, customer: &Customer) -> DbResult<Customer> {
        self.store.record("customers.save")?;
        self.store.inner.customers.upsert_versioned(
            "customer",
            customer.id(),
            customer.key(),
            customer,
            Customer::version,
            Customer::advance_version,
        )
    }

    async fn find_by_id(&self, id: CustomerId) -> DbResult<Option<Customer>> {
        self.store.record("customers.find_by_id")?;
        Ok(self.store.inner.customers.get(&id))
    }

    async fn find_by_key(&self, key: &str) -> DbResult<Option<Customer>> {
        self.store.record("customers.find_by_key")?;
        Ok(self.store.inner.customers.get_by_key(key))
    }

    async fn find_by_external_billing_id(&self, external_id: &str) -> DbResult<Option<Customer>> {
        self.store.record("customers.find_by_external_billing_id")?;
        Ok(self
            .store
            .inner
            .customers
            .filter(|c| c.external_billing_id() == Some(external_id))
            .into_iter()
            .next())
    }

    async fn find_all(&self, filter: &ListFilter) -> DbResult<Vec<Customer>> {
        self.store.record("customers.find_all")?;
        let mut rows = self.store.inner.customers.filter(|c| {
            (filter.include_archived || !c.is_archived()) && filter.matches_key(c.key())
        });
        rows.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(apply_limit(rows, filter.limit))
    }

    async fn delete(&self, id: CustomerId) -> DbResult<bool> {
        self.store.record("customers.delete")?;
        Ok(self
            .store
            .inner
            .customers
            .remove(&id, |c| c.key().to_string())
            .is_some())
    }

    async fn exists(&self, key: &str) -> DbResult<bool> {
        self.store.record("customers.exists")?;
        Ok(self.store.inner.customers.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbError;

    fn customer(key: &str) -> Customer {
        Customer::new(key, "Acme", "billing@acme.test").unwrap()
    }

    #[tokio::test]
    async fn test_save_bumps_version() {
        let repo = MemoryCustomerRepository::new(MemoryStore::new());
        let saved = repo.save(&customer("acme")).await.unwrap();
        assert_eq!(saved.version(), 1);

        let again = repo.save(&saved).await.unwrap();
        assert_eq!(again.version(), 2);
    }

    #[tokio::test]
    async fn test_stale_write_is_rejected() {
        let repo = MemoryCustomerRepository::new(MemoryStore::new());
        let saved = repo.save(&customer("acme")).await.unwrap();

        let mut first = saved.clone();
        first.link_external_billing_id("cus_1");
        repo.save(&first).await.unwrap();

        let mut second = saved;
        second.link_external_billing_id("cus_2");
        let err = repo.save(&second).await.unwrap_err();
        assert!(matches!(err, DbError::VersionConflict { entity: "customer", .. }));
        assert!(err.is_retryable());

        let stored = repo.find_by_key("acme").await.unwrap().unwrap();
        assert_eq!(stored.external_billing_id(), Some("cus_1"));
    }

    #[tokio::test]
    async fn test_find_by_external_billing_id() {
        let repo = MemoryCustomerRepository::new(MemoryStore::new());
        let mut acme = customer("acme");
        acme.link_external_billing_id("cus_1");
        repo.save(&acme).await.unwrap();
        repo.save(&customer("globex")).await.unwrap();

        let found = repo.find_by_external_billing_id("cus_1").await.unwrap().unwrap();
        assert_eq!(found.key(), "acme");
        assert!(repo.find_by_external_billing_id("cus_9").await.unwrap().is_none());
    }
}
