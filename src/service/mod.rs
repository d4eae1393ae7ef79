pub mod catalog;
pub mod date_parser;
pub mod ledger;
pub mod pipeline;
pub mod worker_pool;

pub use catalog::CatalogClient;
pub use date_parser::parse_expiration_date;
pub use ledger::LedgerService;
pub use pipeline::{DetectionPipeline, ImageInfo, RegionReport};
pub use worker_pool::InferencePool;
