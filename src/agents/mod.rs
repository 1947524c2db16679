//! Per-agent runtime
//!
//! - `registry` - static roster and this agent's card
//! - `memory` - session store
//! - `llm` - inference backend providers with streaming
//! - `backend` - backend adapter with token accounting
//! - `router` - message intake, delegation and synthesis
//! - `sibling` - HTTP client for other agents
//! - `prompt` - system and synthesis prompts
//! - `telemetry` - tokens/second window

pub mod backend;
pub mod error;
pub mod llm;
pub mod memory;
pub mod prompt;
pub mod registry;
pub mod router;
pub mod sibling;
pub mod telemetry;

// Re-export commonly used types
pub use backend::{BackendAdapter, TokenStream};
pub use error::*;
pub use registry::AgentRegistry;
pub use router::{DelegationRouter, RoutedReply};
