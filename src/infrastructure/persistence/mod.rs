pub mod database;
pub mod order_store;
pub mod queue;
pub mod stop_store;

pub use database::Database;
pub use order_store::SqliteOrderStore;
pub use queue::SqliteQueue;
pub use stop_store::SqliteStopStore;
