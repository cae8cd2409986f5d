pub mod config;
pub mod coordinator;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod protocol;
pub mod server;
pub mod staging;
pub mod state;
pub mod utils;
pub mod ws;
