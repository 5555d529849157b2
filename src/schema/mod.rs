pub mod enum_def;
pub mod postgres;
pub mod sqlite;
