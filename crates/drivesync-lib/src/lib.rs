// drivesync-lib: OAuth2 sign-in, Drive transfers and the periodic sync engine.

pub mod auth;
pub mod cli;
pub mod cloud;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod errors;
pub mod fileops;
pub mod http_client;
pub mod logger;
pub mod output;
pub mod services;
pub mod signal;
pub mod source;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;
