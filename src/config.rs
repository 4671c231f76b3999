use crate::error::{GatewayError, GatewayResult};

/// Gateway configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Seconds of remaining lifetime below which an access token is treated
    /// as expired and refreshed ahead of use.
    pub refresh_margin_secs: i64,
    /// Upper bound on a single token-endpoint exchange.
    pub refresh_timeout_secs: u64,
    /// Upper bound on a single mail/LLM API call.
    pub upstream_timeout_secs: u64,
    /// Daily chat completions allowed per user.
    pub daily_chat_limit: u32,
    pub google: GoogleOAuthConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl GatewayConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let refresh_margin_secs = env_i64("GATEWAY_REFRESH_MARGIN_SECS", 30);
        let refresh_timeout_secs = env_u64("GATEWAY_REFRESH_TIMEOUT_SECS", 10);
        let upstream_timeout_secs = env_u64("GATEWAY_UPSTREAM_TIMEOUT_SECS", 30);
        let daily_chat_limit = env_u64("GATEWAY_DAILY_CHAT_LIMIT", 20) as u32;

        let google = GoogleOAuthConfig {
            token_endpoint: std::env::var("GATEWAY_GOOGLE_TOKEN_ENDPOINT")
                .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".into()),
            client_id: std::env::var("GATEWAY_GOOGLE_CLIENT_ID")
                .map_err(|_| GatewayError::Config("GATEWAY_GOOGLE_CLIENT_ID is required".into()))?,
            client_secret: std::env::var("GATEWAY_GOOGLE_CLIENT_SECRET").map_err(|_| {
                GatewayError::Config("GATEWAY_GOOGLE_CLIENT_SECRET is required".into())
            })?,
        };

        let llm = LlmConfig {
            base_url: std::env::var("GATEWAY_LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.groq.com/openai/v1".into()),
            api_key: std::env::var("GATEWAY_LLM_API_KEY")
                .map_err(|_| GatewayError::Config("GATEWAY_LLM_API_KEY is required".into()))?,
            model: std::env::var("GATEWAY_LLM_MODEL")
                .unwrap_or_else(|_| "llama-3.3-70b-versatile".into()),
        };

        Ok(Self {
            refresh_margin_secs,
            refresh_timeout_secs,
            upstream_timeout_secs,
            daily_chat_limit,
            google,
            llm,
        })
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}
