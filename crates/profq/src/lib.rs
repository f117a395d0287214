pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod process;
pub mod profile;
pub mod protocol;
pub mod query;
pub mod session;
pub mod storage;

pub use error::{Error, Result};
