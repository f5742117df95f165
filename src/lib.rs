pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod protocol;
pub mod server;
pub mod session;
pub mod voting;
pub mod ws;
