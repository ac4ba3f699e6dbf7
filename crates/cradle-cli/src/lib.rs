//! Cradle CLI library.
//!
//! This crate provides the command-line interface for the cradle tracker.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands, FeedAction, SleepAction};
pub use config::Config;
