//! Tradable-asset universe cache.
//!
//! The validator's tradability gate and the ASSET_UNIVERSE_SYNC processor
//! share this cache. Sells intentionally bypass it (a position must always be
//! closeable), which the validator handles.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::broker::{Asset, BrokerClient, BrokerError};

/// Cached view of the broker's tradable universe.
#[derive(Debug, Default)]
pub struct AssetUniverse {
    assets: RwLock<HashMap<String, Asset>>,
    refreshed_at: RwLock<Option<DateTime<Utc>>>,
}

impl AssetUniverse {
    /// Create an empty universe.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a universe pre-seeded with assets (tests).
    #[must_use]
    pub fn with_assets(assets: Vec<Asset>) -> Self {
        let universe = Self::new();
        universe.replace(assets);
        universe
    }

    /// Refresh from the broker. Returns the number of assets loaded.
    pub async fn refresh(
        &self,
        broker: &dyn BrokerClient,
        asset_class: Option<&str>,
    ) -> Result<usize, BrokerError> {
        let assets = broker.get_assets(asset_class).await?;
        let count = assets.len();
        self.replace(assets);
        tracing::info!(count, "Asset universe refreshed");
        Ok(count)
    }

    /// Replace the cached set.
    pub fn replace(&self, assets: Vec<Asset>) {
        let map = assets
            .into_iter()
            .map(|a| (a.symbol.clone(), a))
            .collect();
        if let Ok(mut guard) = self.assets.write() {
            *guard = map;
        }
        if let Ok(mut guard) = self.refreshed_at.write() {
            *guard = Some(Utc::now());
        }
    }

    /// Look up one asset.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Asset> {
        self.assets.read().ok().and_then(|m| m.get(symbol).cloned())
    }

    /// Whether a symbol is present and tradable.
    #[must_use]
    pub fn is_tradable(&self, symbol: &str) -> bool {
        self.get(symbol).is_some_and(|a| a.tradable)
    }

    /// Whether the cache has ever been populated.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.refreshed_at.read().is_ok_and(|g| g.is_some())
    }

    /// Number of cached assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
