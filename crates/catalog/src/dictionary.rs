//! Data dictionary translation.
//!
//! A dictionary maps stored values of a coded field (e.g. `"gender"`, `"1"`)
//! to human-readable labels. Dictionaries are cached per code and dropped on
//! [`DICTIONARY_INVALIDATED`] events naming the code.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use beacon_cache::{
    publish_invalidation, CacheAsideLoader, CacheError, InvalidationBinder, InvalidationEvent,
    MemoryStore, Store,
};
use beacon_core::error::CoreError;
use beacon_core::event_types::DICTIONARY_INVALIDATED;
use beacon_events::{BusError, EventBus};
use serde::{Deserialize, Serialize};

const CACHE_NAME: &str = "dictionary";
const EVENT_SOURCE: &str = "catalog.dictionary";

// ---------------------------------------------------------------------------
// Dictionary
// ---------------------------------------------------------------------------

/// One value of a dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub value: String,
    pub label: String,
    /// Display order within the dictionary, ascending.
    #[serde(default)]
    pub sort: i32,
}

impl DictionaryEntry {
    pub fn new(value: impl Into<String>, label: impl Into<String>, sort: i32) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
            sort,
        }
    }
}

/// The entries of one dictionary code, in display order.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    entries: Vec<DictionaryEntry>,
    labels: HashMap<String, usize>,
}

impl Dictionary {
    /// Sorts by `sort`, then value. On duplicate values the first entry in
    /// display order wins.
    pub fn new(mut entries: Vec<DictionaryEntry>) -> Self {
        entries.sort_by(|a, b| a.sort.cmp(&b.sort).then_with(|| a.value.cmp(&b.value)));
        let mut labels = HashMap::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            labels.entry(entry.value.clone()).or_insert(idx);
        }
        Self { entries, labels }
    }

    pub fn label(&self, value: &str) -> Option<&str> {
        self.labels
            .get(value)
            .map(|&idx| self.entries[idx].label.as_str())
    }

    pub fn entries(&self) -> &[DictionaryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// DictionarySource
// ---------------------------------------------------------------------------

/// Where dictionaries are read from on a cache miss.
#[async_trait]
pub trait DictionarySource: Send + Sync {
    /// Entries for `code`. Fails with [`CoreError::NotFound`] when the code
    /// does not exist.
    async fn entries(&self, code: &str) -> Result<Vec<DictionaryEntry>, CoreError>;
}

// ---------------------------------------------------------------------------
// DictionaryTranslator
// ---------------------------------------------------------------------------

/// Cached value-to-label translation for coded fields.
pub struct DictionaryTranslator {
    loader: Arc<CacheAsideLoader<String, Arc<Dictionary>>>,
    source: Arc<dyn DictionarySource>,
    binder: InvalidationBinder,
}

impl DictionaryTranslator {
    pub fn new(bus: &EventBus, source: Arc<dyn DictionarySource>) -> Self {
        Self::with_store(bus, source, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(
        bus: &EventBus,
        source: Arc<dyn DictionarySource>,
        store: Arc<dyn Store<String, Arc<Dictionary>>>,
    ) -> Self {
        let loader = Arc::new(CacheAsideLoader::new(CACHE_NAME, store));
        let binder = InvalidationBinder::bind(bus, DICTIONARY_INVALIDATED, Arc::clone(&loader));
        Self {
            loader,
            source,
            binder,
        }
    }

    /// The dictionary for `code`.
    pub async fn entries(&self, code: &str) -> Result<Arc<Dictionary>, CacheError> {
        let source = Arc::clone(&self.source);
        let owned = code.to_string();
        self.loader
            .get(&owned, move || async move {
                let entries = source.entries(code).await?;
                Ok::<_, CoreError>(Arc::new(Dictionary::new(entries)))
            })
            .await
    }

    /// Label for `value` in dictionary `code`.
    ///
    /// Returns `value` itself when the dictionary has no such value or the
    /// code does not exist. Other load failures are returned.
    pub async fn translate(&self, code: &str, value: &str) -> Result<String, CacheError> {
        let dictionary = match self.entries(code).await {
            Ok(dictionary) => dictionary,
            Err(e) if is_not_found(&e) => {
                tracing::warn!(code, value, "Unknown dictionary code, using raw value");
                return Ok(value.to_string());
            }
            Err(e) => return Err(e),
        };

        Ok(match dictionary.label(value) {
            Some(label) => label.to_string(),
            None => {
                tracing::debug!(code, value, "Value missing from dictionary");
                value.to_string()
            }
        })
    }

    /// The event type this translator invalidates on.
    pub fn event_type(&self) -> &str {
        self.binder.event_type()
    }

    /// Publish an invalidation for `codes`. No codes invalidates every
    /// dictionary.
    pub async fn invalidate<I, S>(bus: &EventBus, codes: I) -> Result<(), BusError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        publish_invalidation(
            bus,
            DICTIONARY_INVALIDATED,
            EVENT_SOURCE,
            InvalidationEvent::keys(codes),
        )
        .await
    }
}

fn is_not_found(err: &CacheError) -> bool {
    matches!(
        err.load_cause().and_then(|cause| cause.downcast_ref::<CoreError>()),
        Some(CoreError::NotFound { .. })
    )
}
