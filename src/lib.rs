pub mod bundle;
pub mod commands;
pub mod config;
pub mod error;
pub mod framework;
pub mod package;
pub mod runtime;
