#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod compress;
pub mod config;
pub mod data;
pub mod detail;
pub mod error;
pub mod feed;
pub mod gallery;
pub mod gesture;
pub mod storage;
pub mod ui;
pub mod upload;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};
