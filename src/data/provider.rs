use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::domain::{MarketEvent, TradeRecord};

/// Abstract interface for fetching the trade history a query runs over.
#[async_trait]
pub trait TradeSource: Send + Sync {
    async fn fetch_trades(&self) -> Result<Vec<TradeRecord>>;
}

/// Abstract interface for fetching economic-calendar events.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_events(&self) -> Result<Vec<MarketEvent>>;
}

/// Reads a JSON array from disk on every fetch.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn read_array<T: serde::de::DeserializeOwned>(&self) -> Result<Vec<T>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }
}

#[async_trait]
impl TradeSource for JsonFileSource {
    async fn fetch_trades(&self) -> Result<Vec<TradeRecord>> {
        self.read_array().await
    }
}

#[async_trait]
impl EventSource for JsonFileSource {
    async fn fetch_events(&self) -> Result<Vec<MarketEvent>> {
        self.read_array().await
    }
}
