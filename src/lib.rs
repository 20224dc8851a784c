pub mod configs;
pub mod crypto;
pub mod driver;
pub mod error;
pub mod executor;
pub mod host;
pub mod policy;
pub mod retention;
pub mod schedule;
pub mod settings;
pub mod state;
