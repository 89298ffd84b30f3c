mod store;

pub use store::PgStore;
