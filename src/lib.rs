// Library exports for testing and reuse

// `Scheduler` is only driven from the main task, so its futures need no `Send` bound
#![allow(async_fn_in_trait)]

pub mod app_state;
pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use app_state::AppState;
pub use config::Config;
pub use error::{ReconcileError, Result};
