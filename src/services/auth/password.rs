//! Password management service
//!
//! Handles password hashing, storage, and validation independent of HTTP concerns.
//! The credential is a single argon2 PHC string kept in the config store; the
//! string embeds its own salt and cost parameters.

use crate::{
    config_tree::{EditTransaction, QueryResult},
    services::wizard::{WizardService, WizardStep},
    uci_client::{ConfigStore, Filter, StoreError},
};
use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordVerifier,
    password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
};
use log::{debug, info, warn};

pub const CREDENTIAL_PATH: &str = "foris.auth.password";

/// Result of checking a candidate password against the stored credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialCheck {
    /// No credential stored yet; authentication is not required.
    NoCredentialSet,
    Matches,
    Mismatches,
}

impl CredentialCheck {
    pub fn grants_access(self) -> bool {
        matches!(self, CredentialCheck::NoCredentialSet | CredentialCheck::Matches)
    }
}

/// Service for password management operations
pub struct PasswordService;

impl PasswordService {
    /// Check a candidate password against the stored credential
    ///
    /// # Arguments
    /// * `store` - Config store holding the credential
    /// * `candidate` - The plaintext password to check
    ///
    /// # Returns
    /// Which of the three credential states applies, or the store failure
    pub async fn check_password<Store>(
        store: &Store,
        candidate: &str,
    ) -> Result<CredentialCheck, StoreError>
    where
        Store: ConfigStore,
    {
        debug!("check_password() called");

        let result = store.query(Filter::foris()).await?;
        Ok(Self::check_against(Self::stored_hash(&result), candidate))
    }

    /// Whether `candidate` grants access; true when no credential is set.
    pub async fn verify_password<Store>(store: &Store, candidate: &str) -> Result<bool, StoreError>
    where
        Store: ConfigStore,
    {
        Self::check_password(store, candidate)
            .await
            .map(CredentialCheck::grants_access)
    }

    /// Check if a password has been set
    pub async fn password_exists<Store>(store: &Store) -> Result<bool, StoreError>
    where
        Store: ConfigStore,
    {
        let result = store.query(Filter::foris()).await?;
        Ok(Self::stored_hash(&result).is_some())
    }

    pub fn stored_hash(result: &QueryResult) -> Option<&str> {
        result.value(CREDENTIAL_PATH)
    }

    /// Compare `candidate` with a stored PHC hash.
    ///
    /// The comparison itself is done by argon2. An empty or unparsable hash
    /// never matches.
    pub fn check_against(stored: Option<&str>, candidate: &str) -> CredentialCheck {
        let Some(stored) = stored else {
            return CredentialCheck::NoCredentialSet;
        };

        if stored.is_empty() {
            warn!("stored password hash is empty");
            return CredentialCheck::Mismatches;
        }

        let parsed_hash = match PasswordHash::new(stored) {
            Ok(hash) => hash,
            Err(e) => {
                warn!("failed to parse stored password hash: {e}");
                return CredentialCheck::Mismatches;
            }
        };

        match Argon2::default().verify_password(candidate.as_bytes(), &parsed_hash) {
            Ok(()) => CredentialCheck::Matches,
            Err(_) => CredentialCheck::Mismatches,
        }
    }

    /// Hash a password using Argon2
    pub fn hash_password(password: &str) -> Result<String> {
        debug!("hash_password() called");

        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| anyhow!(e))
            .context("failed to hash password")
    }

    /// Edit that stores `hash` as the credential, for combining with other
    /// writes of the same transaction.
    pub fn credential_edit(hash: &str) -> EditTransaction {
        let mut edit = EditTransaction::new();
        edit.set("foris", "auth", "config", "password", hash);
        edit
    }

    /// Hash and store a password outside the wizard
    ///
    /// The password step counts as done afterwards: the marker is moved past
    /// it in the same transaction unless it already is.
    pub async fn store_password<Store>(store: &Store, password: &str) -> Result<()>
    where
        Store: ConfigStore,
    {
        debug!("store_password() called");

        let hash = Self::hash_password(password)?;
        let result = store
            .query(Filter::foris())
            .await
            .context("failed to read wizard progress")?;

        let past_password_step = WizardStep::Password.number() + 1;
        let mut edit = Self::credential_edit(&hash);
        if WizardService::progress_from(&result).allowed_max() < past_password_step {
            info!("marking the password step as completed");
            edit.merge(WizardService::marker_edit(past_password_step));
        }

        store
            .apply(edit)
            .await
            .context("failed to store password")
    }
}
