use crate::{
    config::SessionConfig,
    services::auth::{SessionState, session::SESSION_STATE_KEY},
    session_store::MemorySessionStore,
};
use actix_session::{
    SessionExt, SessionMiddleware,
    config::{BrowserSession, CookieContentSecurity},
};
use actix_web::{
    Error,
    cookie::{Key, SameSite, time::Duration},
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{self, HeaderValue},
};
use std::{
    future::{Future, Ready, ready},
    pin::Pin,
    rc::Rc,
};

pub const NO_CACHE: &str = "no-store, no-cache, must-revalidate, no-transform, max-age=0";

/// Session middleware over the server-side `store`.
///
/// Stored records outlive the idle timeout by the same amount again; idle
/// expiry itself is decided on the session record.
pub fn session_middleware(
    config: &SessionConfig,
    key: Key,
    store: MemorySessionStore,
) -> SessionMiddleware<MemorySessionStore> {
    let idle_secs = i64::try_from(config.idle_timeout.as_secs()).unwrap_or(i64::MAX / 2);
    let state_ttl = Duration::seconds(idle_secs.saturating_mul(2));

    SessionMiddleware::builder(store, key)
        .cookie_name(config.cookie_name.clone())
        .cookie_secure(config.cookie_secure)
        .session_lifecycle(BrowserSession::default().state_ttl(state_ttl))
        .cookie_same_site(SameSite::Strict)
        .cookie_content_security(CookieContentSecurity::Private)
        .cookie_http_only(true)
        .build()
}

/// Adds framing protection to every response and disables caching of pages
/// served to authenticated sessions. Must run inside the session middleware.
pub struct SecurityHeadersMw;

impl<S, B> Transform<S, ServiceRequest> for SecurityHeadersMw
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = SecurityHeadersMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SecurityHeadersMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct SecurityHeadersMiddleware<S> {
    service: Rc<S>,
}

type LocalBoxFuture<T> = Pin<Box<dyn Future<Output = T> + 'static>>;

impl<S, B> Service<ServiceRequest> for SecurityHeadersMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        Box::pin(async move {
            let mut res = service.call(req).await?;

            let authenticated = res
                .request()
                .get_session()
                .get::<SessionState>(SESSION_STATE_KEY)
                .ok()
                .flatten()
                .is_some_and(|state| state.authenticated());

            let headers = res.headers_mut();
            headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
            if authenticated {
                headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
                headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
            }

            Ok(res)
        })
    }
}
