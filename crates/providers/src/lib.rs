//! LLM backends for Switchyard.
//!
//! All backends implement the `switchyard_core::Provider` trait.
//! The gateway picks the backend for each request and handles fallback.

pub mod gateway;
pub mod openai_compat;

pub use gateway::{Backend, LlmGateway};
pub use openai_compat::OpenAiCompatProvider;
