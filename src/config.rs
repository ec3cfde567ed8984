use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub participant_timeout_secs: u64,
    pub force_first_message: bool,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub analysis_model: String,
    pub groq_api_key: String,
    pub cerebras_api_key: String,
    pub ollama_url: String,
    pub usage_api_url: String,
    pub usage_api_key: String,
}

impl AppConfig {
    /// Loads `.env` (if present) and then reads the environment.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "receptionist.db".to_string()),
            participant_timeout_secs: env::var("PARTICIPANT_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(35),
            force_first_message: env::var("FORCE_FIRST_MESSAGE")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            analysis_model: env::var("ANALYSIS_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            groq_api_key: env::var("GROQ_API_KEY").unwrap_or_default(),
            cerebras_api_key: env::var("CEREBRAS_API_KEY").unwrap_or_default(),
            ollama_url: env::var("OLLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            usage_api_url: env::var("USAGE_API_URL").unwrap_or_default(),
            usage_api_key: env::var("USAGE_API_KEY").unwrap_or_default(),
        }
    }

    pub fn participant_timeout(&self) -> Duration {
        Duration::from_secs(self.participant_timeout_secs)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: ":memory:".to_string(),
            participant_timeout_secs: 35,
            force_first_message: true,
            openai_api_key: String::new(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            analysis_model: "gpt-4o-mini".to_string(),
            groq_api_key: String::new(),
            cerebras_api_key: String::new(),
            ollama_url: "http://localhost:11434".to_string(),
            usage_api_url: String::new(),
            usage_api_key: String::new(),
        }
    }
}
