//! Where to send the browser next
//!
//! Redirect targets supplied by the client are only followed when they stay
//! on the current origin; everything else falls back to the landing page
//! computed from authentication and wizard progress.

use crate::services::wizard::WizardProgress;
use log::debug;
use reqwest::Url;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum RedirectError {
    #[error("unsafe redirect target: {0:?}")]
    UnsafeRedirectTarget(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Login surface.
    Index,
    WizardIndex,
    WizardStep(u32),
    ConfigIndex,
}

impl Route {
    pub fn path(self) -> String {
        match self {
            Route::Index => "/".to_string(),
            Route::WizardIndex => "/wizard/".to_string(),
            Route::WizardStep(step) => format!("/wizard/step/{step}"),
            Route::ConfigIndex => "/config/".to_string(),
        }
    }

    /// Wizard resume point for `progress`.
    pub fn resume(progress: WizardProgress) -> Self {
        match progress.furthest_step() {
            1 => Route::WizardIndex,
            step => Route::WizardStep(step),
        }
    }
}

/// Whether `target` may be redirected to from a request for `current_host`.
///
/// Only absolute paths qualify; anything carrying a scheme, an authority or
/// a `//` that a browser could read as one is refused.
pub fn is_safe_redirect(target: &str, current_host: &str) -> bool {
    if !target.starts_with('/')
        || target.contains("//")
        || target.contains('\\')
        || target.chars().any(char::is_control)
    {
        return false;
    }

    let Ok(base) = Url::parse(&format!("http://{current_host}/")) else {
        return false;
    };
    let Ok(resolved) = base.join(target) else {
        return false;
    };

    resolved.scheme() == base.scheme()
        && resolved.host() == base.host()
        && resolved.port_or_known_default() == base.port_or_known_default()
}

/// Checked form of [`is_safe_redirect`].
pub fn safe_redirect(target: &str, current_host: &str) -> Result<String, RedirectError> {
    if is_safe_redirect(target, current_host) {
        Ok(target.to_string())
    } else {
        Err(RedirectError::UnsafeRedirectTarget(target.to_string()))
    }
}

/// Landing location after the session and progress were resolved.
pub fn resolve_landing(
    authenticated: bool,
    progress: WizardProgress,
    next: Option<&str>,
    current_host: &str,
) -> String {
    if let Some(next) = next {
        match safe_redirect(next, current_host) {
            Ok(target) => return target,
            Err(e) => debug!("ignoring requested target: {e}"),
        }
    }

    if !authenticated {
        return Route::Index.path();
    }

    if !progress.is_completed() {
        return Route::resume(progress).path();
    }

    Route::ConfigIndex.path()
}

/// `path` with `next` attached as a query parameter.
pub fn path_with_next(path: &str, next: &str) -> String {
    match Url::parse_with_params(&format!("http://localhost{path}"), [("next", next)]) {
        Ok(url) => match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        },
        Err(_) => path.to_string(),
    }
}

/// Login surface that returns to `path` after authentication.
pub fn unauthenticated_redirect(path: &str) -> String {
    if path == Route::Index.path() {
        Route::Index.path()
    } else {
        path_with_next(&Route::Index.path(), path)
    }
}

/// Where to retry a failed login; keeps `next` only when it is safe.
pub fn login_retry(next: Option<&str>, current_host: &str) -> String {
    match next {
        Some(next) if is_safe_redirect(next, current_host) => unauthenticated_redirect(next),
        _ => Route::Index.path(),
    }
}
