//! # Services module
//!
//! This module provide services to expose amazon rds resources through the
//! open service broker api and helpers to do so.
pub mod broker;
pub mod catalog;
pub mod cfg;
pub mod http;
pub mod rds;
pub mod sql;
#[cfg(test)]
pub mod testing;
