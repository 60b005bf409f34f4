pub mod api_key;
pub mod catalog;
pub mod usage;
