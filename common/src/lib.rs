pub mod config;
pub mod decoder;
pub mod feed;
pub mod mqtt;
