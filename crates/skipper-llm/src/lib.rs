//! Completion collaborator implementations.
//!
//! `AnthropicClient` talks to the Messages API (non-streaming); `MockClient`
//! replays scripted responses for deterministic engine tests.

pub mod anthropic;
pub mod mock;

pub use anthropic::AnthropicClient;
pub use mock::{MockClient, ScriptedResponse};
