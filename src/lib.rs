pub mod config;
pub mod data_types;
pub mod error;
#[cfg(feature = "frontend-http")]
pub mod frontend;
pub mod query;
pub mod repository;
pub mod service;
pub mod version;
