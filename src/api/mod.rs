//! API Module
//!
//! Gemini generateContent request and response types.

pub mod generate;

pub use generate::{
    ApiError, ApiErrorEnvelope, Candidate, Content, GenerateContentRequest,
    GenerateContentResponse, GenerationConfig, InlineData, Part, PromptFeedback, UsageMetadata,
};
