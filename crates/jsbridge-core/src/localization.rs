//! Localized strings.
//!
//! Overrides set by addons live in the key-value store under
//! `loc:<language>:<id>`, so they survive reloads.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::error::{BridgeError, Result};
use crate::store::KeyValueStore;

const FALLBACK_LANGUAGE: &str = "en";

pub struct Localization {
    store: Arc<dyn KeyValueStore>,
    language: RwLock<String>,
}

impl Localization {
    pub fn new(store: Arc<dyn KeyValueStore>, language: &str) -> Self {
        Self {
            store,
            language: RwLock::new(language.to_string()),
        }
    }

    pub fn language(&self) -> String {
        self.language.read().clone()
    }

    pub fn set_language(&self, language: &str) {
        *self.language.write() = language.to_string();
    }

    pub fn set(&self, id: &str, language: &str, text: &str) -> Result<()> {
        if id.is_empty() || language.is_empty() {
            return Err(BridgeError::invalid(
                "localization id and language must not be empty",
            ));
        }
        if let Err(e) = self.store.set(&key(language, id), text) {
            warn!(id, language, "failed to persist string: {}", e);
        }
        Ok(())
    }

    /// Look up `scoped_id`, then `bare_id`, in the current language and then
    /// in English. Falls back to `bare_id` itself.
    pub fn translate(&self, scoped_id: &str, bare_id: &str) -> String {
        let language = self.language();
        let mut languages = vec![language.as_str()];
        if language != FALLBACK_LANGUAGE {
            languages.push(FALLBACK_LANGUAGE);
        }

        languages
            .iter()
            .flat_map(|lang| [key(lang, scoped_id), key(lang, bare_id)])
            .find_map(|k| self.store.get(&k))
            .unwrap_or_else(|| bare_id.to_string())
    }
}

impl fmt::Debug for Localization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Localization")
            .field("language", &*self.language.read())
            .finish_non_exhaustive()
    }
}

fn key(language: &str, id: &str) -> String {
    format!("loc:{language}:{id}")
}
