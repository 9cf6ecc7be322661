pub mod cli;
pub mod commands;
pub mod context;
pub mod engine;
pub mod error;
pub mod paths;
pub mod policy;
pub mod ports;
pub mod probe;
pub mod protocol;
pub mod recipe;
pub mod registry;
pub mod repo;

pub use error::{AppError, ErrorKind, Result};
