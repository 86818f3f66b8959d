pub mod api;
pub mod chain;
pub mod config;
pub mod db;
pub mod events;
pub mod lifecycle;
pub mod logging;
pub mod queue;
pub mod reconcile;
pub mod scheduler;
pub mod withdrawal_request;
