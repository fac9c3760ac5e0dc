use anyhow::Result;
use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use msp_core::PuppetId;

use crate::{ThreadStore, TokenRecord, TokenStore};

#[derive(Default)]
pub struct MemoryThreadStore {
    first: DashMap<String, String>,
    last: DashMap<String, String>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn set_first(&self, event_id: &str, first: &str) -> Result<bool> {
        match self.first.entry(event_id.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(first.to_string());
                Ok(true)
            }
        }
    }

    async fn get_first(&self, event_id: &str) -> Result<Option<String>> {
        Ok(self.first.get(event_id).map(|entry| entry.value().clone()))
    }

    async fn set_last(&self, root: &str, last: &str) -> Result<()> {
        self.last.insert(root.to_string(), last.to_string());
        Ok(())
    }

    async fn get_last(&self, root: &str) -> Result<Option<String>> {
        Ok(self.last.get(root).map(|entry| entry.value().clone()))
    }

    async fn remove(&self, event_id: &str) -> Result<()> {
        self.first.remove(event_id);
        self.last.remove(event_id);
        self.first.retain(|_, first| first != event_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: DashMap<PuppetId, TokenRecord>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn save(&self, record: TokenRecord) -> Result<()> {
        self.tokens.insert(record.puppet, record);
        Ok(())
    }

    async fn get(&self, puppet: PuppetId) -> Result<Option<TokenRecord>> {
        Ok(self.tokens.get(&puppet).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, puppet: PuppetId) -> Result<()> {
        self.tokens.remove(&puppet);
        Ok(())
    }
}
