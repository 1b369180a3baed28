mod llm;
mod tmdb;

use crate::types::Movie;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

pub use llm::LlmAnswerer;
pub use tmdb::TmdbClient;

/// Result type for oracle operations
pub type OracleResult<T> = Result<T, OracleError>;

/// Errors that can occur while talking to the content services
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("No movies matched the given filters")]
    NoResults,

    #[error("Response parsing failed: {0}")]
    ParseError(String),
}

/// Fallback answer when generation fails; the round keeps going
pub const ANSWER_FALLBACK: &str =
    "I'm having trouble answering that question right now. Try asking something else!";

/// Fallback hint when generation fails
pub const HINT_FALLBACK: &str =
    "I'm having trouble generating a hint right now. Try asking another question!";

/// External capability supplying the secret movie and natural-language
/// answers/hints about it.
///
/// `fetch_movie` may fail (the caller surfaces `ContentUnavailable`);
/// `answer_question` and `hint` never fail hard and must degrade to a
/// fallback string instead.
#[async_trait]
pub trait MovieOracle: Send + Sync {
    /// Fetch a random movie matching the given discover filters
    async fn fetch_movie(&self, category_params: &HashMap<String, String>) -> OracleResult<Movie>;

    /// Answer a free-text question about the movie. `question_number` is
    /// 1-based and lets the generator ramp how direct it is.
    async fn answer_question(&self, movie: &Movie, question: &str, question_number: usize)
        -> String;

    /// Produce a hint. `questions_asked` is how many history entries exist.
    async fn hint(&self, movie: &Movie, questions_asked: usize) -> String;
}

/// Production oracle: TMDB for movies, an OpenAI-compatible LLM for answers.
/// Without an LLM it still works, just always with the fallback strings.
pub struct LiveOracle {
    tmdb: TmdbClient,
    llm: Option<LlmAnswerer>,
}

#[async_trait]
impl MovieOracle for LiveOracle {
    async fn fetch_movie(&self, category_params: &HashMap<String, String>) -> OracleResult<Movie> {
        self.tmdb.random_movie(category_params).await
    }

    async fn answer_question(
        &self,
        movie: &Movie,
        question: &str,
        question_number: usize,
    ) -> String {
        let Some(llm) = &self.llm else {
            return ANSWER_FALLBACK.to_string();
        };

        match llm.answer_question(movie, question, question_number).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("Answer generation failed, using fallback: {}", e);
                ANSWER_FALLBACK.to_string()
            }
        }
    }

    async fn hint(&self, movie: &Movie, questions_asked: usize) -> String {
        let Some(llm) = &self.llm else {
            return HINT_FALLBACK.to_string();
        };

        match llm.hint(movie, questions_asked).await {
            Ok(hint) => hint,
            Err(e) => {
                tracing::warn!("Hint generation failed, using fallback: {}", e);
                HINT_FALLBACK.to_string()
            }
        }
    }
}

/// Configuration for the content services
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// TMDB API key (required for the live oracle)
    pub tmdb_api_key: Option<String>,
    /// API key for the OpenAI-compatible chat endpoint
    pub llm_api_key: Option<String>,
    /// Base URL of the chat endpoint (defaults to Groq's OpenAI-compatible API)
    pub llm_base_url: String,
    /// Chat model to use
    pub llm_model: String,
    /// Timeout for generation requests
    pub llm_timeout: Duration,
    /// Max tokens per generated answer
    pub llm_max_tokens: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            tmdb_api_key: None,
            llm_api_key: None,
            llm_base_url: "https://api.groq.com/openai/v1".to_string(),
            llm_model: "llama-3.1-8b-instant".to_string(),
            llm_timeout: Duration::from_secs(30),
            llm_max_tokens: 1024,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

impl OracleConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tmdb_api_key: non_empty_env("TMDB_API_KEY"),
            llm_api_key: non_empty_env("LLM_API_KEY").or_else(|| non_empty_env("GROQ_API_KEY")),
            llm_base_url: non_empty_env("LLM_BASE_URL").unwrap_or(defaults.llm_base_url),
            llm_model: non_empty_env("LLM_MODEL").unwrap_or(defaults.llm_model),
            llm_timeout: std::env::var("LLM_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.llm_timeout),
            llm_max_tokens: std::env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.llm_max_tokens),
        }
    }

    /// Build the live oracle. Fails without a TMDB key; the LLM is optional
    /// (answers degrade to fallbacks without one).
    pub fn build(&self) -> OracleResult<LiveOracle> {
        let api_key = self.tmdb_api_key.clone().ok_or_else(|| {
            OracleError::ConfigError("TMDB_API_KEY is not set".to_string())
        })?;

        let llm = self.llm_api_key.as_ref().map(|key| {
            LlmAnswerer::new(
                key.clone(),
                self.llm_base_url.clone(),
                self.llm_model.clone(),
                self.llm_timeout,
                self.llm_max_tokens,
            )
        });

        if llm.is_none() {
            tracing::warn!("No LLM API key configured; answers and hints will use fallbacks");
        }

        Ok(LiveOracle {
            tmdb: TmdbClient::new(api_key),
            llm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = OracleConfig::default();
        assert_eq!(config.llm_model, "llama-3.1-8b-instant");
        assert_eq!(config.llm_timeout, Duration::from_secs(30));
        assert!(config.tmdb_api_key.is_none());
    }

    #[test]
    #[serial]
    fn test_from_env_trims_blank_keys() {
        std::env::set_var("TMDB_API_KEY", "   ");
        std::env::set_var("GROQ_API_KEY", "gsk_test");
        let config = OracleConfig::from_env();
        assert!(config.tmdb_api_key.is_none());
        assert_eq!(config.llm_api_key.as_deref(), Some("gsk_test"));
        std::env::remove_var("TMDB_API_KEY");
        std::env::remove_var("GROQ_API_KEY");
    }

    #[test]
    #[serial]
    fn test_build_requires_tmdb_key() {
        std::env::remove_var("TMDB_API_KEY");
        let config = OracleConfig::from_env();
        assert!(matches!(
            config.build(),
            Err(OracleError::ConfigError(_))
        ));
    }
}
