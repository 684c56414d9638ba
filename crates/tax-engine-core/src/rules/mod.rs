pub mod schema;
pub mod store;

pub use schema::*;
pub use store::RuleStore;
