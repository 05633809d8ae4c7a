pub mod connection;

pub use connection::{create_sqlite_pool, run_migrations};
