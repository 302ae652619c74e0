//! Inference backends, prompt templates and map-reduce summarization.
//!
//! This crate provides:
//! - Backend traits for captioning, text completion and transcription
//! - An OpenAI-compatible HTTP client with model discovery and SSE streaming
//! - An HTTP client for the audio transcription service
//! - Subtitle (SRT) transcript parsing
//! - Prompt template helpers
//! - A context-budget-aware map-reduce summarizer

pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod openai;
pub mod srt;
pub mod summarizer;
pub mod template;
pub mod types;

pub use audio::TranscriptionClient;
pub use backend::{CaptionBackend, TextBackend, TokenStream, TranscriptionBackend};
pub use config::{AudioClientConfig, CompletionDefaults, OpenAiConfig};
pub use error::{InferenceError, InferenceResult};
pub use openai::OpenAiClient;
pub use srt::parse_srt;
pub use summarizer::{MapReduceSummarizer, SummarizerConfig, SummaryPrompts};
