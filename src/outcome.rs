//! Result of a request handler and its translation into an HTTP response.
//!
//! Handlers return an [`Outcome`] instead of short-circuiting with redirects;
//! [`Outcome::into_response`] is the single place where it becomes HTTP.

use crate::{
    services::{
        auth::AuthError,
        navigation::{Route, unauthenticated_redirect},
        wizard::StepError,
    },
    uci_client::StoreError,
};
use actix_web::{HttpResponse, http::header};
use serde::Serialize;

pub const STEP_NOT_CONFIRMED: &str = "step not confirmed, please retry";
pub const STORE_UNAVAILABLE: &str = "configuration store unavailable, please retry";

#[derive(Clone, Debug, PartialEq)]
pub enum ErrorKind {
    /// Wrong password; the browser retries the login at `retry`.
    AuthenticationFailed { retry: String },
    /// Protected page requested without an authenticated session.
    Unauthenticated,
    /// Most likely an expired session; the browser is sent to log in again.
    CsrfValidationFailed,
    Forbidden,
    StepOutOfOrder { allowed: u32 },
    /// Completing a step failed at the store.
    StepNotConfirmed,
    /// Any other store failure.
    Store,
    InvalidInput(Vec<String>),
    NotFound(String),
    Internal,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    Continue(T),
    RedirectTo(String),
    Error(ErrorKind),
}

#[derive(Serialize)]
struct InvalidInputBody<'a> {
    errors: &'a [String],
}

impl<T> Outcome<T>
where
    T: Serialize,
{
    /// `request_path` is where the browser returns to after re-authenticating.
    pub fn into_response(self, request_path: &str) -> HttpResponse {
        match self {
            Outcome::Continue(body) => HttpResponse::Ok().json(body),
            Outcome::RedirectTo(location) => found(&location),
            Outcome::Error(kind) => kind.into_response(request_path),
        }
    }
}

impl ErrorKind {
    fn into_response(self, request_path: &str) -> HttpResponse {
        match self {
            ErrorKind::AuthenticationFailed { retry } => found(&retry),
            ErrorKind::Unauthenticated | ErrorKind::CsrfValidationFailed => {
                found(&unauthenticated_redirect(request_path))
            }
            ErrorKind::Forbidden => HttpResponse::Forbidden().finish(),
            ErrorKind::StepOutOfOrder { allowed } => found(&Route::WizardStep(allowed).path()),
            ErrorKind::StepNotConfirmed => {
                HttpResponse::ServiceUnavailable().body(STEP_NOT_CONFIRMED)
            }
            ErrorKind::Store => HttpResponse::ServiceUnavailable().body(STORE_UNAVAILABLE),
            ErrorKind::InvalidInput(errors) => {
                HttpResponse::BadRequest().json(InvalidInputBody { errors: &errors })
            }
            ErrorKind::NotFound(message) => HttpResponse::NotFound().body(message),
            ErrorKind::Internal => HttpResponse::InternalServerError().finish(),
        }
    }
}

fn found(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .insert_header((header::LOCATION, location))
        .finish()
}

impl From<StoreError> for ErrorKind {
    fn from(_: StoreError) -> Self {
        ErrorKind::Store
    }
}

impl From<AuthError> for ErrorKind {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::CsrfValidationFailed => ErrorKind::CsrfValidationFailed,
        }
    }
}

impl From<StepError> for ErrorKind {
    fn from(e: StepError) -> Self {
        match e {
            StepError::OutOfOrder { allowed, .. } => ErrorKind::StepOutOfOrder { allowed },
            StepError::NotConfirmed(_) | StepError::Store(_) => ErrorKind::StepNotConfirmed,
        }
    }
}
