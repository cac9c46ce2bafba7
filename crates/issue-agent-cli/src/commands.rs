pub mod common;
pub mod create_pr;
pub mod list_functions;
pub mod react;
pub mod version;
