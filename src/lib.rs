pub mod database_sqlx;
pub mod error;
pub mod export;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod quality;
pub mod reconciler;
pub mod resolver;
pub mod store;
pub mod utils;

pub use error::{EngineError, Result};
