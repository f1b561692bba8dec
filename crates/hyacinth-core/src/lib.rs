//! Core engine for the Hyacinth listing-notification bot.
//!
//! This crate is framework-agnostic. The chat platform lives behind
//! [`messaging::port::MessagingPort`] and sources behind
//! [`plugins::ScraperPlugin`], implemented in adapter crates.

pub mod bot;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod interaction;
pub mod listing;
pub mod logging;
pub mod matching;
pub mod messaging;
pub mod plugins;
pub mod reactions;
pub mod router;
pub mod scheduler;
pub mod search;
pub mod security;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
