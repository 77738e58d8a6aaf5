pub mod api;
pub mod card_generator;
pub mod card_service;
pub mod catalog;
pub mod config;
pub mod database;
pub mod diagnostics;
pub mod errors;
pub mod llm_providers;
pub mod logging;
pub mod models;
pub mod topics;

pub use card_generator::{CardGenerator, CardRequest, GenerationOutcome, GenerationPolicy};
pub use card_service::CardService;
pub use catalog::FallbackCatalog;
pub use database::Database;
pub use errors::*;
pub use llm_providers::{
    CompletionBackend, CompletionRequest, GenerationBackend, LLMProvider, LLMProviderFactory, LLMProviderType,
};
pub use models::*;
pub use topics::{extract_topic, is_duplicate, ExclusionSet};
