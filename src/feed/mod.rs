pub mod optimistic;
pub mod query;
pub mod store;
