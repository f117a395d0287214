pub mod import;
pub mod list;
pub mod load;
pub mod query;
pub mod stop;
