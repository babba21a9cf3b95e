//! Place search
//!
//! `PlaceSearch` is the geocoding contract. `ThrottledPlaceSearch` wraps any
//! implementation so underlying requests are at least `min_interval` apart and
//! repeated queries are answered from a cache. `CatalogPlaceSearch` searches a
//! fixed list of places (from config).

use crate::domain::error::Result;
use crate::domain::types::{Destination, Location};
use crate::services::distance::distance;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Minimum spacing between requests to the underlying search
pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

#[async_trait]
pub trait PlaceSearch: Send + Sync {
    async fn search_places(&self, query: &str, near: Option<Location>) -> Result<Vec<Destination>>;
}

struct ThrottleState {
    last_request: Option<Instant>,
    cache: FxHashMap<String, Vec<Destination>>,
}

/// Rate-limited, caching wrapper around a `PlaceSearch`
pub struct ThrottledPlaceSearch<S> {
    inner: S,
    min_interval: Duration,
    // tokio mutex: held across the throttle sleep so requests queue in order
    state: Mutex<ThrottleState>,
}

impl<S: PlaceSearch> ThrottledPlaceSearch<S> {
    pub fn new(inner: S) -> Self {
        Self::with_interval(inner, MIN_REQUEST_INTERVAL)
    }

    pub fn with_interval(inner: S, min_interval: Duration) -> Self {
        Self {
            inner,
            min_interval,
            state: Mutex::new(ThrottleState { last_request: None, cache: FxHashMap::default() }),
        }
    }

    fn cache_key(query: &str) -> String {
        query.trim().to_lowercase()
    }
}

#[async_trait]
impl<S: PlaceSearch> PlaceSearch for ThrottledPlaceSearch<S> {
    async fn search_places(&self, query: &str, near: Option<Location>) -> Result<Vec<Destination>> {
        let key = Self::cache_key(query);
        let mut state = self.state.lock().await;

        if let Some(hit) = state.cache.get(&key) {
            debug!(query = %key, results = %hit.len(), "place_search_cache_hit");
            return Ok(hit.clone());
        }

        if let Some(last) = state.last_request {
            let ready_at = last + self.min_interval;
            if Instant::now() < ready_at {
                debug!(query = %key, "place_search_throttled");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        state.last_request = Some(Instant::now());

        let results = self.inner.search_places(query, near).await?;
        state.cache.insert(key, results.clone());
        Ok(results)
    }
}

/// Case-insensitive search over a fixed list of places, nearest first when
/// a reference point is given
pub struct CatalogPlaceSearch {
    places: Vec<Destination>,
}

impl CatalogPlaceSearch {
    pub fn new(places: Vec<Destination>) -> Self {
        Self { places }
    }
}

#[async_trait]
impl PlaceSearch for CatalogPlaceSearch {
    async fn search_places(&self, query: &str, near: Option<Location>) -> Result<Vec<Destination>> {
        let needle = query.trim().to_lowercase();
        let mut matches: Vec<Destination> = self
            .places
            .iter()
            .filter(|p| {
                needle.is_empty()
                    || p.name.to_lowercase().contains(&needle)
                    || p.address.to_lowercase().contains(&needle)
                    || p.id.to_lowercase() == needle
            })
            .cloned()
            .collect();

        if let Some(origin) = near {
            matches.sort_by(|a, b| {
                distance(&origin, &a.location).total_cmp(&distance(&origin, &b.location))
            });
        }
        Ok(matches)
    }
}
