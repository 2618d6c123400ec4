//! These models represent the objects passed around by the bridge
//!
//! There are a few related formats we need to interact with:
//! - openai chat-completion messages/tools, sent from the bridge to the model
//! - MCP tool listings and call results, exchanged with the tool backend
//!
//! We always immediately convert those wire formats into the internal structs,
//! so nothing outside `providers` and `tools` ever sees a provider-specific shape.
pub mod content;
pub mod conversation;
pub mod message;
pub mod response;
pub mod role;
pub mod tool;
