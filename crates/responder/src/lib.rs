//! AI auto-replies: prompt assembly and the completion backend.

pub mod openai;
pub mod prompt;
pub mod responder;

pub use {
    openai::OpenAiCompletionClient,
    prompt::{ChatMessage, MediaContext, PromptAssets},
    responder::{AiResponder, CompletionClient},
};
