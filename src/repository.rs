pub mod builder;
pub mod ddl;
pub mod interface;
pub mod memory;
pub mod param;
pub mod postgres;
