pub mod config;
pub mod entries;
