pub mod assets;
pub mod batch;
pub mod commands;
pub mod config;
pub mod errors;
pub mod events;
pub mod request;
pub mod transcript;
