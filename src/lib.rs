pub mod config;
pub mod db;
pub mod export;
pub mod handlers;
pub mod media;
pub mod registry;
pub mod throttle;
