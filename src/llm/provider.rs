//! Provider-specific configuration and detection.
//!
//! This module handles differences between LLM API providers: names accepted
//! in request configuration, default endpoints and models, URL patterns, and
//! how intermediate tool messages must be reshaped between pipeline phases.

use crate::pipeline::IntermediatePolicy;

/// Supported LLM providers. All are reached over an OpenAI-compatible
/// chat completions endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// `OpenAI` (api.openai.com)
    OpenAI,
    /// Google Gemini through its OpenAI-compatible endpoint
    Google,
    /// Ollama (local)
    Ollama,
    /// Generic OpenAI-compatible provider
    Generic,
}

impl Provider {
    /// Resolve a provider from its configuration name.
    ///
    /// ```rust,ignore
    /// assert_eq!(Provider::from_name("gemini"), Some(Provider::Google));
    /// ```
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAI),
            "google" | "gemini" => Some(Self::Google),
            "ollama" => Some(Self::Ollama),
            "generic" | "openai-compatible" => Some(Self::Generic),
            _ => None,
        }
    }

    /// Detect provider from base URL.
    #[must_use]
    pub fn detect_from_url(base_url: &str) -> Self {
        let lower = base_url.to_lowercase();

        if lower.contains("generativelanguage.googleapis.com") {
            Self::Google
        } else if lower.contains(":11434") || lower.contains("ollama") {
            Self::Ollama
        } else if lower.contains("openai.com") {
            Self::OpenAI
        } else {
            Self::Generic
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Google => "google",
            Self::Ollama => "ollama",
            Self::Generic => "generic",
        }
    }

    /// Default base URL, including the API version segment.
    #[must_use]
    pub const fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("https://api.openai.com/v1"),
            Self::Google => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
            Self::Ollama => Some("http://localhost:11434/v1"),
            Self::Generic => None,
        }
    }

    #[must_use]
    pub const fn default_model(self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("gpt-4o-mini"),
            Self::Google => Some("gemini-2.0-flash-001"),
            Self::Ollama => Some("qwen2.5:7b"),
            Self::Generic => None,
        }
    }

    /// Whether requests must carry a bearer token.
    #[must_use]
    pub const fn requires_api_key(self) -> bool {
        matches!(self, Self::OpenAI | Self::Google)
    }

    /// How phase-one messages are reshaped before phase two.
    #[must_use]
    pub const fn intermediate_policy(self) -> IntermediatePolicy {
        match self {
            Self::OpenAI | Self::Generic => IntermediatePolicy::Passthrough,
            Self::Google => IntermediatePolicy::ConversationRolesOnly,
            Self::Ollama => IntermediatePolicy::DemoteToolMessages,
        }
    }

    /// Build the chat completions URL for this provider.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL including its version segment
    #[must_use]
    pub fn build_chat_url(self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
