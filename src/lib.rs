pub mod app;
pub mod catalog;
pub mod config;
pub mod credentials;
pub mod downloader;
pub mod hooks;
pub mod humanize;
pub mod ledger;
pub mod observability;
pub mod scheduler;
pub mod server;
pub mod sources;
