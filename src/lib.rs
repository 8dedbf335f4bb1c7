//! Bootstrap and lifecycle layer of the loan management backend.
//!
//! [`app::Application`] composes feature [`modules`] into one HTTP server, migrates their
//! tables in two phases (local tables, then cross-module foreign keys) and drives
//! graceful startup and shutdown.

pub mod app;
pub mod cache;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod logging;
pub mod migration;
pub mod modules;
pub mod reset;
pub mod schema;
pub mod server;
pub mod storage;

pub use app::module::{Module, RouteRegistrar};
pub use app::{Application, ShutdownOutcome};
pub use error::{LoanAppError, Result};

pub const APP_NAME: &str = "LoanApp";
