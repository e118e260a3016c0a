//! Lead lifecycle and assignment engine for an admissions office.

pub mod assignment;
pub mod attention;
pub mod capability;
pub mod clock;
pub mod config;
pub mod db;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod import;
pub mod intake;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod report;
pub mod seed;
pub mod staff;
pub mod store;
pub mod sweep;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use capability::{Capabilities, Session};
pub use config::{Config, OrgConfig, Tuning};
pub use engine::LeadEngine;
pub use error::{EngineError, EngineResult};
pub use store::Store;
