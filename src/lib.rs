pub mod config;
pub mod fetch;
pub mod humanize;
pub mod jobs;
pub mod observability;
pub mod queue;
