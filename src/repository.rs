//! Persistence collaborator contract (out-of-scope, consumed only by
//! contract per spec.md §6). An in-memory implementation is provided so the
//! core can be exercised end-to-end in tests without a real database.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[async_trait]
pub trait Repository<T: Clone + Send + Sync>: Send + Sync {
    async fn save(&self, id: &str, item: T) -> anyhow::Result<()>;
    async fn find_all(&self) -> anyhow::Result<Vec<T>>;
    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<T>>;
    async fn delete_by_id(&self, id: &str) -> anyhow::Result<bool>;
    async fn count(&self) -> anyhow::Result<usize>;
}

pub struct InMemoryRepository<T: Clone + Send + Sync> {
    items: RwLock<HashMap<String, T>>,
}

impl<T: Clone + Send + Sync> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> Repository<T> for InMemoryRepository<T> {
    async fn save(&self, id: &str, item: T) -> anyhow::Result<()> {
        self.items.write().unwrap().insert(id.to_string(), item);
        Ok(())
    }

    async fn find_all(&self) -> anyhow::Result<Vec<T>> {
        Ok(self.items.read().unwrap().values().cloned().collect())
    }

    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<T>> {
        Ok(self.items.read().unwrap().get(id).cloned())
    }

    async fn delete_by_id(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.items.write().unwrap().remove(id).is_some())
    }

    async fn count(&self) -> anyhow::Result<usize> {
        Ok(self.items.read().unwrap().len())
    }
}
