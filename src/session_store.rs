//! Server-side session records
//!
//! The cookie only carries an opaque key. Records live in process memory,
//! are dropped once their TTL passes, and are gone for good after `delete`,
//! so a copied cookie stops working with logout.

use actix_session::storage::{LoadError, SaveError, SessionKey, SessionStore, UpdateError};
use actix_web::cookie::time::Duration;
use anyhow::anyhow;
use log::debug;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};
use uuid::Uuid;

type Record = HashMap<String, String>;

struct Entry {
    record: Record,
    /// `None` when the TTL does not fit into an `Instant`.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

#[derive(Clone, Default)]
pub struct MemorySessionStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expiry(now: Instant, ttl: &Duration) -> Option<Instant> {
        now.checked_add(std::time::Duration::try_from(*ttl).unwrap_or_default())
    }

    fn generate_key() -> anyhow::Result<SessionKey> {
        SessionKey::try_from(Uuid::new_v4().simple().to_string())
            .map_err(|e| anyhow!("failed to generate session key: {e}"))
    }

    /// Rewrite every stored record in place.
    #[cfg(test)]
    pub(crate) fn edit_records(&self, edit: impl Fn(&mut Record)) {
        for entry in self.lock().values_mut() {
            edit(&mut entry.record);
        }
    }
}

impl SessionStore for MemorySessionStore {
    async fn load(&self, session_key: &SessionKey) -> Result<Option<Record>, LoadError> {
        let now = Instant::now();
        let mut entries = self.lock();

        match entries.get(session_key.as_ref()) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.record.clone())),
            Some(_) => {
                debug!("session record expired");
                entries.remove(session_key.as_ref());
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, session_state: Record, ttl: &Duration) -> Result<SessionKey, SaveError> {
        let key = Self::generate_key().map_err(SaveError::Other)?;
        let now = Instant::now();
        let mut entries = self.lock();

        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(
            key.as_ref().to_string(),
            Entry {
                record: session_state,
                expires_at: Self::expiry(now, ttl),
            },
        );

        Ok(key)
    }

    async fn update(
        &self,
        session_key: SessionKey,
        session_state: Record,
        ttl: &Duration,
    ) -> Result<SessionKey, UpdateError> {
        let now = Instant::now();
        let mut entries = self.lock();

        // a deleted record is never brought back under its old key
        match entries.get_mut(session_key.as_ref()) {
            Some(entry) if entry.is_live(now) => {
                entry.record = session_state;
                entry.expires_at = Self::expiry(now, ttl);
                Ok(session_key)
            }
            _ => Err(UpdateError::Other(anyhow!(
                "session record no longer exists"
            ))),
        }
    }

    async fn update_ttl(&self, session_key: &SessionKey, ttl: &Duration) -> anyhow::Result<()> {
        let now = Instant::now();
        if let Some(entry) = self.lock().get_mut(session_key.as_ref()) {
            entry.expires_at = Self::expiry(now, ttl);
        }
        Ok(())
    }

    async fn delete(&self, session_key: &SessionKey) -> anyhow::Result<()> {
        self.lock().remove(session_key.as_ref());
        Ok(())
    }
}
