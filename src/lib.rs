pub mod api;
pub mod config;
pub mod config_tree;
pub mod http_client;
pub mod middleware;
pub mod outcome;
pub mod services;
pub mod session_store;
pub mod uci_client;
