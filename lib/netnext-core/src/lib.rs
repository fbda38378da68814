#![allow(clippy::too_many_arguments)]

pub mod address;
pub mod client;
pub mod concurrency;
pub mod config;
pub mod counters;
pub mod error;
pub mod relay;
pub mod replay;
pub mod route;
pub mod server;
pub mod session;
pub mod stats;
pub mod tables;
pub mod wire;
