//! LLM transport implementations for AppForge.
//!
//! All providers implement the `appforge_core::Provider` trait.

pub mod openai_compat;

pub use openai_compat::{OpenAiCompatProvider, SseDecoder};
