//! In-memory service catalog.
//!
//! The catalog is tiny and read on every submission, so it is cached and
//! refreshed from a backing `ServiceCatalog` (usually the SQLite store) once
//! the TTL expires.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use parking_lot::{Mutex, RwLock};
use regex::Regex;

use crate::error::{EngineError, EngineResult};
use crate::storage::{ServiceCatalog, ServiceCatalogEntry};
use crate::validation::report::is_valid_identifier;

/// Cache TTL in seconds (10 minutes).
pub const CATALOG_CACHE_TTL_SECS: u64 = 600;

const BUILTIN_CATALOG: &str = include_str!("../../data/services_catalog.json");

lazy_static! {
    /// DNS hostname: dot-separated labels, at least one dot
    static ref HOSTNAME_PATTERN: Regex = Regex::new(
        r"^(?i)[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)+$"
    ).unwrap();
}

/// Whether `host` is a syntactically valid DNS hostname.
pub fn is_valid_hostname(host: &str) -> bool {
    host.len() <= 253 && HOSTNAME_PATTERN.is_match(host)
}

/// Entries shipped with the crate.
pub fn builtin_catalog() -> EngineResult<Vec<ServiceCatalogEntry>> {
    Ok(serde_json::from_str(BUILTIN_CATALOG)?)
}

#[derive(Debug, Default)]
struct CatalogState {
    services: HashMap<String, ServiceCatalogEntry>,
    loaded_at: Option<Instant>,
    /// Set after a failed reload; no reload is tried before it.
    retry_after: Option<Instant>,
}

/// Thread-safe catalog cache with a refresh TTL.
pub struct CatalogCache {
    state: RwLock<CatalogState>,
    ttl: Duration,
    /// Reloaded on read once the TTL has expired.
    source: Option<Arc<dyn ServiceCatalog>>,
    /// Held by the one reader performing a reload.
    reloading: Mutex<()>,
}

impl fmt::Debug for CatalogCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogCache")
            .field("services", &self.len())
            .field("ttl", &self.ttl)
            .field("backed", &self.source.is_some())
            .finish()
    }
}

impl Default for CatalogCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(CATALOG_CACHE_TTL_SECS))
    }
}

impl CatalogCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: RwLock::new(CatalogState::default()),
            ttl,
            source: None,
            reloading: Mutex::new(()),
        }
    }

    /// A cache loaded from `source` now and reloaded from it whenever a read
    /// finds the entries older than `ttl`.
    pub fn backed_by(source: Arc<dyn ServiceCatalog>, ttl: Duration) -> EngineResult<Self> {
        let cache = Self {
            state: RwLock::new(CatalogState::default()),
            ttl,
            source: Some(source),
            reloading: Mutex::new(()),
        };
        if let Some(source) = &cache.source {
            cache.refresh_from(source.as_ref())?;
        }
        Ok(cache)
    }

    /// A cache preloaded with the built-in entries.
    pub fn builtin() -> EngineResult<Self> {
        let cache = Self::default();
        cache.load_entries(builtin_catalog()?);
        Ok(cache)
    }

    /// Replace the cached entries. Malformed entries are skipped; returns the
    /// number kept.
    pub fn load_entries(&self, entries: Vec<ServiceCatalogEntry>) -> usize {
        let received = entries.len();
        let services: HashMap<String, ServiceCatalogEntry> = entries
            .into_iter()
            .filter_map(normalize_entry)
            .map(|entry| (entry.id.clone(), entry))
            .collect();
        let kept = services.len();

        let mut state = self.state.write();
        state.services = services;
        state.loaded_at = Some(Instant::now());
        state.retry_after = None;

        log::info!(
            "CATALOG_CACHE_LOADED services={} skipped={}",
            kept,
            received - kept
        );
        kept
    }

    /// Load entries from a JSON array.
    pub fn load_from_json(&self, json: &str) -> EngineResult<usize> {
        let entries: Vec<ServiceCatalogEntry> = serde_json::from_str(json)?;
        Ok(self.load_entries(entries))
    }

    /// Reload from a backing catalog.
    pub fn refresh_from(&self, source: &dyn ServiceCatalog) -> EngineResult<usize> {
        let entries = source.list_services()?;
        if entries.is_empty() {
            return Err(EngineError::NotFound {
                what: "service catalog",
                id: "*".to_string(),
            });
        }
        Ok(self.load_entries(entries))
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().loaded_at.is_some()
    }

    pub fn len(&self) -> usize {
        self.state.read().services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if cache needs refresh (empty or TTL expired).
    pub fn needs_refresh(&self) -> bool {
        let state = self.state.read();
        if state.services.is_empty() {
            return true;
        }
        match state.loaded_at {
            Some(loaded_at) => loaded_at.elapsed() > self.ttl,
            None => true,
        }
    }

    /// Get cache age in seconds (for logging).
    pub fn cache_age_secs(&self) -> Option<u64> {
        self.state.read().loaded_at.map(|t| t.elapsed().as_secs())
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.services.clear();
        state.loaded_at = None;
        state.retry_after = None;
    }

    fn reload_due(&self) -> bool {
        let backing_off = self
            .state
            .read()
            .retry_after
            .map_or(false, |at| Instant::now() < at);
        !backing_off && self.needs_refresh()
    }

    /// Reload from the backing catalog if the TTL expired.
    ///
    /// Only one reader reloads at a time; the others keep serving the current
    /// entries. A failed reload also keeps them and is not retried for one TTL.
    fn refresh_if_stale(&self) {
        let source = match &self.source {
            Some(source) if self.reload_due() => source,
            _ => return,
        };
        let _reloading = match self.reloading.try_lock() {
            Some(guard) => guard,
            None => return,
        };
        if !self.reload_due() {
            return;
        }
        if let Err(err) = self.refresh_from(source.as_ref()) {
            self.state.write().retry_after = Some(Instant::now() + self.ttl);
            log::warn!(
                "CATALOG_REFRESH_FAILED age_secs={:?} retry_in_secs={} error={}",
                self.cache_age_secs(),
                self.ttl.as_secs(),
                err
            );
        }
    }
}

impl ServiceCatalog for CatalogCache {
    fn get_service(&self, service_id: &str) -> EngineResult<Option<ServiceCatalogEntry>> {
        self.refresh_if_stale();
        Ok(self.state.read().services.get(service_id).cloned())
    }

    fn list_services(&self) -> EngineResult<Vec<ServiceCatalogEntry>> {
        self.refresh_if_stale();
        let mut services: Vec<ServiceCatalogEntry> =
            self.state.read().services.values().cloned().collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(services)
    }
}

/// Lower-case hostnames, drop invalid ones and make sure the main domain is
/// listed. `None` if the entry is unusable.
fn normalize_entry(mut entry: ServiceCatalogEntry) -> Option<ServiceCatalogEntry> {
    entry.main_domain = entry.main_domain.trim().to_lowercase();
    if !is_valid_identifier(&entry.id) || !is_valid_hostname(&entry.main_domain) {
        log::warn!(
            "CATALOG_ENTRY_SKIPPED id={} main_domain={}",
            entry.id,
            entry.main_domain
        );
        return None;
    }

    let domains = std::mem::take(&mut entry.domains);
    entry.domains = domains
        .into_iter()
        .map(|d| d.trim().to_lowercase())
        .filter(|d| {
            let valid = is_valid_hostname(d);
            if !valid {
                log::debug!("CATALOG_DOMAIN_DROPPED id={} domain={}", entry.id, d);
            }
            valid
        })
        .collect();
    entry.domains.insert(entry.main_domain.clone());
    Some(entry)
}
