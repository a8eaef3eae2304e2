pub mod password;
pub mod session;

pub use password::{CredentialCheck, PasswordService};
pub use session::{AuthError, FlashMessage, MessageLevel, SessionState, unix_now};

use crate::{
    config::AppConfig,
    services::wizard::WizardProgress,
    uci_client::{ConfigStore, StoreError},
};
use log::{debug, info};

pub const LOGIN_FAILED_MESSAGE: &str = "The password you entered was not valid.";
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired, please log in again.";

#[derive(Clone, Debug, PartialEq)]
pub enum LoginOutcome {
    /// Successor session with a new identity.
    Authenticated(SessionState),
    /// The existing session stays as it is.
    Rejected,
}

/// Session level authentication decisions
pub struct AuthService;

impl AuthService {
    /// Log in with `candidate`
    ///
    /// A missing credential logs in as well, since nothing has been set up
    /// yet. The caller cannot tell this apart from a matching password.
    pub async fn login<Store>(
        store: &Store,
        session: &SessionState,
        candidate: &str,
        now: u64,
    ) -> Result<LoginOutcome, StoreError>
    where
        Store: ConfigStore,
    {
        debug!("login() called");

        if PasswordService::verify_password(store, candidate).await? {
            info!("session authenticated by password");
            Ok(LoginOutcome::Authenticated(session.logged_in(now)))
        } else {
            info!("login rejected");
            Ok(LoginOutcome::Rejected)
        }
    }

    /// Refresh the session's view of the wizard progress.
    ///
    /// While the wizard sits at the auto-auth step and no credential is
    /// stored the session is authenticated without a password check.
    pub fn resolve_session(
        session: SessionState,
        progress: WizardProgress,
        credential_set: bool,
        config: &AppConfig,
    ) -> SessionState {
        let furthest = progress.furthest_step();
        let session = session.with_next_step_allowed(furthest);

        if !session.authenticated()
            && !credential_set
            && config.wizard.auto_auth_step == Some(furthest)
        {
            info!("session auto-authenticated at wizard step {furthest}");
            return session.with_authentication(true);
        }

        session
    }

    pub fn is_authenticated(session: &SessionState, config: &AppConfig) -> bool {
        config.auth_disabled() || session.authenticated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uci_client::MemoryStore;

    fn with_password(password: &str) -> MemoryStore {
        let hash = PasswordService::hash_password(password).expect("should hash");
        MemoryStore::with_edit(PasswordService::credential_edit(&hash))
    }

    mod login {
        use super::*;

        #[tokio::test]
        async fn correct_password_changes_identity() {
            let store = with_password("turris");
            let session = SessionState::new(10);

            let outcome = AuthService::login(&store, &session, "turris", 20)
                .await
                .unwrap();

            let LoginOutcome::Authenticated(next) = outcome else {
                panic!("login should succeed");
            };
            assert!(next.authenticated());
            assert_ne!(next.id(), session.id());
            assert_ne!(next.csrf_token(), session.csrf_token());
        }

        #[tokio::test]
        async fn wrong_password_is_rejected() {
            let store = with_password("turris");
            let session = SessionState::new(10);

            let outcome = AuthService::login(&store, &session, "omnia", 20)
                .await
                .unwrap();

            assert_eq!(outcome, LoginOutcome::Rejected);
        }

        #[tokio::test]
        async fn no_credential_logs_in() {
            let store = MemoryStore::new();
            let session = SessionState::new(10);

            let outcome = AuthService::login(&store, &session, "", 20).await.unwrap();

            assert!(matches!(outcome, LoginOutcome::Authenticated(s) if s.authenticated()));
        }

        #[tokio::test]
        async fn store_errors_propagate() {
            let store = MemoryStore::new();
            store.fail_next_query(StoreError::Timeout);

            let result = AuthService::login(&store, &SessionState::new(10), "x", 20).await;

            assert_eq!(result, Err(StoreError::Timeout));
        }
    }

    mod resolve_session {
        use super::*;

        #[test]
        fn first_step_auto_authenticates() {
            let config = AppConfig::default();
            let session = SessionState::new(10);

            let resolved = AuthService::resolve_session(session, WizardProgress::new(1), false, &config);

            assert!(resolved.authenticated());
            assert_eq!(resolved.next_step_allowed(), Some(1));
        }

        #[test]
        fn fresh_appliance_auto_authenticates() {
            let config = AppConfig::default();

            let resolved = AuthService::resolve_session(
                SessionState::new(10),
                WizardProgress::default(),
                false,
                &config,
            );

            assert!(resolved.authenticated());
        }

        #[test]
        fn later_steps_require_login() {
            let config = AppConfig::default();

            let resolved = AuthService::resolve_session(
                SessionState::new(10),
                WizardProgress::new(2),
                false,
                &config,
            );

            assert!(!resolved.authenticated());
            assert_eq!(resolved.next_step_allowed(), Some(2));
        }

        #[test]
        fn auto_auth_can_be_disabled() {
            let mut config = AppConfig::default();
            config.wizard.auto_auth_step = None;

            let resolved = AuthService::resolve_session(
                SessionState::new(10),
                WizardProgress::new(1),
                false,
                &config,
            );

            assert!(!resolved.authenticated());
        }

        #[test]
        fn stored_credential_requires_login() {
            let config = AppConfig::default();

            let resolved = AuthService::resolve_session(
                SessionState::new(10),
                WizardProgress::default(),
                true,
                &config,
            );

            assert!(!resolved.authenticated());
            assert_eq!(resolved.next_step_allowed(), Some(1));
        }

        #[test]
        fn identity_is_kept() {
            let config = AppConfig::default();
            let session = SessionState::new(10);
            let id = session.id().to_string();

            let resolved = AuthService::resolve_session(session, WizardProgress::new(1), false, &config);

            assert_eq!(resolved.id(), id);
        }
    }

    #[test]
    fn no_auth_mode_authenticates_everyone() {
        let mut config = AppConfig::default();
        let session = SessionState::new(10);
        assert!(!AuthService::is_authenticated(&session, &config));

        config.debug = true;
        config.no_auth = true;
        assert!(AuthService::is_authenticated(&session, &config));
    }
}
