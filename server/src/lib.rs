pub mod config;
pub mod handlers;
pub mod identity;
pub mod media;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
pub mod utils;
