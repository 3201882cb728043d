// Session queries for the questline SQLite store.

pub(crate) mod row_types;
mod sessions;

pub use sessions::SessionCounts;
