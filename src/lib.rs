pub mod accounts;
pub mod app;
pub mod classify;
pub mod cli;
pub mod config;
pub mod errors;
pub mod gmail;
pub mod oauth;
pub mod onboarding;
pub mod retry;
pub mod sanitize;
pub mod state;
pub mod sync;
pub mod types;
