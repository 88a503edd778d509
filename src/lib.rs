pub mod app;
pub mod batch;
pub mod config;
pub mod gate;
pub mod ledger;
pub mod machine;
pub mod session;
pub mod shared;
pub mod validate;
