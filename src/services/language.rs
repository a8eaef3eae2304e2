//! Interface language, shared with LuCI
//!
//! The language lives in two places: `foris.settings.lang` for this frontend
//! and `luci.main.lang` for LuCI. Both are written together.

use crate::{
    config::LanguageConfig,
    config_tree::{EditTransaction, QueryResult},
    uci_client::{ConfigStore, StoreError},
};
use log::{debug, warn};

pub const LANGUAGE_PATH: &str = "foris.settings.lang";

pub struct LanguageService;

impl LanguageService {
    /// Stored language, or the default when it is missing or unknown.
    pub fn language_from(result: &QueryResult, config: &LanguageConfig) -> String {
        match result.value(LANGUAGE_PATH) {
            Some(lang) if config.is_available(lang) => lang.to_string(),
            Some(lang) => {
                warn!("stored language '{lang}' is not available, using default");
                config.default.clone()
            }
            None => config.default.clone(),
        }
    }

    pub fn language_edit(lang: &str) -> EditTransaction {
        let mut edit = EditTransaction::new();
        edit.set("foris", "settings", "config", "lang", lang);
        edit.set("luci", "main", "core", "lang", lang);
        edit
    }

    pub async fn write_language<Store>(store: &Store, lang: &str) -> Result<(), StoreError>
    where
        Store: ConfigStore,
    {
        debug!("write_language() called");

        store.apply(Self::language_edit(lang)).await
    }
}
