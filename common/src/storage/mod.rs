pub mod db;
pub mod metadata;
pub mod store;
pub mod types;
