pub mod api;
pub mod bootstrap;
pub mod cache;
pub mod cli;
pub mod config;
pub mod database;
pub mod effects;
pub mod enrich;
pub mod error;
pub mod index;
pub mod metrics;
pub mod model;
pub mod node;
pub mod plugins;
pub mod posting;
pub mod reads;
pub mod realtime;
pub mod search;
pub mod telemetry;
pub mod utils;
pub mod webhooks;
