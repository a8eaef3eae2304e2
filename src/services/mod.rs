//! Business logic services
//!
//! This module contains business logic separated from HTTP concerns.
//! Services are stateless operations over a [`ConfigStore`](crate::uci_client::ConfigStore)
//! and plain values, so they can be tested without a web server.

pub mod auth;
pub mod language;
pub mod navigation;
pub mod wizard;
