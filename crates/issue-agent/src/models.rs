//! These models represent the objects passed around by the agent runtime
//!
//! There are three vendor formats we need to interact with:
//! - openai chat completion messages/tools
//! - anthropic messages/tools
//! - bedrock converse messages/tools
//!
//! We always immediately convert those into the internal structs using the to/from helpers in
//! each provider. The internal models are not an exact match to any of these formats.
pub mod message;
pub mod step;
pub mod tool;
