//! Gatekeeper Common Types
//!
//! Ollama wire types shared by the gatekeeper backend and the stress tester.

pub mod ollama;

pub use ollama::{
    ChatChunk, ChatMessage, ChatRequest, GenerateRequest, KeepAlive, PsModel, PsResponse,
    TagModel, TagsResponse,
};
