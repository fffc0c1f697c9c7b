//! Persistence layer: connection pool, schema management, and repositories.

pub mod db;
pub mod repository;
