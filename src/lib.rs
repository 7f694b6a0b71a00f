pub mod compactor;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod hub;
pub mod id;
pub mod limits;
pub mod model;
pub mod observability;
pub mod service;
pub mod store;
pub mod wal;
