pub mod memory_store;
pub mod moka_store;

pub use memory_store::MemoryTtlStore;
pub use moka_store::MokaTtlStore;

use dogpile::ports::{StoreFactory, TtlStore};
use shared::config::{Config, StoreKind};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Builds the store selected by `Config::store`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultStoreFactory;

impl<K, V> StoreFactory<K, V> for DefaultStoreFactory
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn create_from_config(&self, config: &Config) -> Arc<dyn TtlStore<K, V>> {
        match config.store {
            StoreKind::Memory => Arc::new(MemoryTtlStore::new()),
            StoreKind::Moka => {
                let store = MokaTtlStore::new("dogpile", config.stale_retention);
                tracing::info!(
                    "Using moka store, stale entries kept for {:?}",
                    store.stale_retention()
                );
                Arc::new(store)
            }
        }
    }
}
