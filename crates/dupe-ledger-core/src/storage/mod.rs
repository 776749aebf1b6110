pub mod models;
pub mod queries;
mod sqlite;

pub use models::*;
pub use queries::FingerprintGroups;
pub use sqlite::Catalog;
