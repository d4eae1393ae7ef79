pub mod memory;
pub mod pool;
pub mod postgres;
pub mod queries;
pub mod store;

pub use memory::MemoryLineStore;
pub use pool::{create_pool, ensure_schema};
pub use postgres::PgLineStore;
pub use store::{AdjustTarget, LineStore, QuantityTarget};
