pub mod agent;
pub mod config;
pub mod errors;
pub mod extract;
pub mod git;
pub mod github;
pub mod models;
pub mod orchestrator;
pub mod prompt_template;
pub mod providers;
pub mod reactor;
pub mod services;
pub mod store;
pub mod tools;
