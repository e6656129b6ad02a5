pub mod config;
pub mod engine;
pub mod error;
pub mod id;
pub mod insertion;
pub mod model;
pub mod ranking;
pub mod registry;
pub mod scoring;
pub mod selection;
pub mod store;
