pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod mapping;
pub mod models;
pub mod providers;
pub mod routes;
pub mod scheduler;
pub mod store;
