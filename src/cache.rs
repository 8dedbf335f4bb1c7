use crate::constants::{ADMINS_TABLE, CUSTOMERS_TABLE, LOAN_OFFICERS_TABLE, LOAN_SCHEMES_TABLE};
use crate::error::Result;
use crate::storage::{Record, Repository};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Entity lists kept in memory because nearly every request touches them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachedEntity {
    Admins,
    LoanOfficers,
    Customers,
    LoanSchemes,
}

impl CachedEntity {
    pub const ALL: [CachedEntity; 4] = [
        CachedEntity::Admins,
        CachedEntity::LoanOfficers,
        CachedEntity::Customers,
        CachedEntity::LoanSchemes,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            CachedEntity::Admins => ADMINS_TABLE,
            CachedEntity::LoanOfficers => LOAN_OFFICERS_TABLE,
            CachedEntity::Customers => CUSTOMERS_TABLE,
            CachedEntity::LoanSchemes => LOAN_SCHEMES_TABLE,
        }
    }

    pub fn for_table(table: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.table() == table)
    }
}

/// Process-wide entity cache owned by the application.
///
/// Populated by [`EntityCache::load_all`] once migrations have run; a write to a cached
/// table invalidates its entry and the next read reloads it from the repository. Each
/// invalidation bumps the entry's generation, and a reload that started before the bump
/// is returned to its caller but never stored.
#[derive(Default)]
pub struct EntityCache {
    entries: RwLock<Entries>,
}

#[derive(Default)]
struct Entries {
    records: HashMap<CachedEntity, Arc<Vec<Record>>>,
    generations: HashMap<CachedEntity, u64>,
}

impl Entries {
    fn generation(&self, kind: CachedEntity) -> u64 {
        self.generations.get(&kind).copied().unwrap_or_default()
    }
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load_all(&self, repository: &dyn Repository) -> Result<()> {
        let generations: Vec<_> = {
            let entries = self.entries.read().await;
            CachedEntity::ALL
                .into_iter()
                .map(|kind| (kind, entries.generation(kind)))
                .collect()
        };

        let mut loaded = Vec::with_capacity(generations.len());
        for (kind, generation) in generations {
            let records = repository.find_all(kind.table()).await?;
            debug!(?kind, count = records.len(), "Loaded cache entry");
            loaded.push((kind, generation, Arc::new(records)));
        }

        let mut entries = self.entries.write().await;
        for (kind, generation, records) in loaded {
            if entries.generation(kind) == generation {
                entries.records.insert(kind, records);
            }
        }
        info!("Entity cache populated");
        Ok(())
    }

    pub async fn get(
        &self,
        kind: CachedEntity,
        repository: &dyn Repository,
    ) -> Result<Arc<Vec<Record>>> {
        let generation = {
            let entries = self.entries.read().await;
            if let Some(records) = entries.records.get(&kind) {
                return Ok(records.clone());
            }
            entries.generation(kind)
        };

        let records = Arc::new(repository.find_all(kind.table()).await?);

        let mut entries = self.entries.write().await;
        if entries.generation(kind) == generation {
            entries.records.insert(kind, records.clone());
            debug!(?kind, "Reloaded cache entry");
        } else {
            debug!(?kind, "Entry invalidated during reload, not caching");
        }
        Ok(records)
    }

    pub async fn invalidate(&self, kind: CachedEntity) {
        let mut entries = self.entries.write().await;
        *entries.generations.entry(kind).or_default() += 1;
        if entries.records.remove(&kind).is_some() {
            debug!(?kind, "Invalidated cache entry");
        }
    }

    /// Invalidate whatever entry is backed by `table`, if any
    pub async fn invalidate_table(&self, table: &str) {
        if let Some(kind) = CachedEntity::for_table(table) {
            self.invalidate(kind).await;
        }
    }

    pub async fn is_cached(&self, kind: CachedEntity) -> bool {
        self.entries.read().await.records.contains_key(&kind)
    }
}
