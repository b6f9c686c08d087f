//! Data layer for coursegen: connection pool, embedded migrations, row
//! models, and query modules for the generation tables.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
