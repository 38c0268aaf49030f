pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod inventory;
pub mod library;
pub mod output;
pub mod progress;
pub mod purge;
pub mod query;
pub mod store;
pub mod tui;
