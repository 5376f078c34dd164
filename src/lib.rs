pub mod auth;
pub mod config;
pub mod engine;
pub mod forms;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod repository;
pub mod session;
pub mod wal;
pub mod web;
pub mod workflow;
