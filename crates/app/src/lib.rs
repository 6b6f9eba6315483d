pub mod client;
pub mod commands;
pub mod config;
pub mod protocol;
pub mod server;
pub mod session;
pub mod telemetry;
