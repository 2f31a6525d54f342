//! Revocable, per-device login sessions behind an encrypted cookie.

pub mod auth;
pub mod config;
pub mod credential;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod user_agent;
