pub mod anthropic;
pub mod base;
pub mod bedrock;
pub mod configs;
pub mod factory;
#[cfg(test)]
pub mod mock;
pub mod openai;
pub mod retry;
pub mod utils;
