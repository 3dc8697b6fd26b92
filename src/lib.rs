#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod listing;
pub mod logging;
pub mod output;
pub mod prompt;
pub mod registry;
pub mod remote;
pub mod ssh;

#[cfg(test)]
mod testing;
