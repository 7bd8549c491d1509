//! # notifeed
//!
//! Merges unread notifications from mail, code hosting, chat and notes
//! services into one time-sorted feed, and keeps each service's credential
//! renewable and persisted.

pub mod config;
pub mod credentials;
pub mod error;
pub mod handlers;
pub mod manager;
pub mod models;
pub mod routing;
pub mod server;
pub mod sources;
pub mod telemetry;
