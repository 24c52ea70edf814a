//! vo-federation HTTP server.
//!
//! Serves provider administration, the login callback, on-demand group
//! sync and the share notification queue over the PostgreSQL stores.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
