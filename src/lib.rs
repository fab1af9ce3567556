pub mod classify;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod db;
pub mod dhash;
pub mod error;
pub mod export;
pub mod graph;
pub mod hamming;
pub mod ingest;
pub mod job;
mod metrics;
pub mod quota;
mod server;
pub mod utils;

pub use config::Opts;
pub use job::{JobRunner, Pipeline};
