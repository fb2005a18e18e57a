//! Core domain + application logic for the seatwatch notification engine.
//!
//! This crate is intentionally platform-agnostic. Telegram / GitHub live
//! behind ports (traits) implemented in adapter crates; the scraper and
//! the interval scheduler are external collaborators that drive the
//! [`fanout::Notifier`] entry points.

pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod donations;
pub mod enforcer;
pub mod errors;
pub mod fanout;
pub mod invites;
pub mod logging;
pub mod ports;
pub mod review;
pub mod store;
pub mod subscribers;
#[cfg(test)]
pub(crate) mod testing;
pub mod update;
pub mod verify;

pub use errors::{Error, Result};
