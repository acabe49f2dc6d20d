//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the sync crates:
//! - Logging and tracing setup
//! - Configuration and bridge injection
//! - Typed event bus
//!
//! ## Overview
//!
//! Nothing here knows how files are synced. This crate establishes the
//! logging conventions, the capability wiring and the event vocabulary that
//! `core-sync` and host applications share.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, EventSeverity, EventStream};
