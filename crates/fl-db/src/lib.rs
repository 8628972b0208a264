pub mod bookmark_repo;
pub mod record_repo;
pub mod run_repo;
pub mod schema;
pub mod store;
pub mod util;

pub use crate::store::DbStore;
