pub mod errors;
pub mod models;
pub mod pg;
pub mod store;

pub use errors::LedgerError;
pub use models::*;
pub use store::*;
