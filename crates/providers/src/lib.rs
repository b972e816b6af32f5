//! LLM provider implementations for matagent.
//!
//! All providers implement the `matagent_core::Provider` trait. The
//! factory builds one per API key.

pub mod factory;
pub mod openai_compat;

pub use factory::ConfiguredProviderFactory;
pub use openai_compat::OpenAiCompatProvider;
