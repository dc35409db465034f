pub mod adapters;
pub mod config;
pub mod dns;
pub mod error;
pub mod lb;
pub mod model;
pub mod supervisor;
