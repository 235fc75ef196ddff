use serde::Deserialize;

/// Application configuration loaded from environment variables
///
/// Every component receives this as an explicit value at construction; there
/// is no global mutable state. Tunables default to the production values, so
/// only the credentials are mandatory.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Google Places / Geocoding API key
    pub google_places_api_key: String,

    /// Gemini API key
    pub gemini_api_key: String,

    /// Object store HTTP endpoint (S3-compatible gateway)
    pub storage_base_url: String,

    /// Optional bearer credential for the object store
    #[serde(default)]
    pub storage_api_key: Option<String>,

    #[serde(default = "default_places_api_base")]
    pub places_api_base: String,

    #[serde(default = "default_generative_api_base")]
    pub generative_api_base: String,

    /// Full model name, e.g. "models/gemini-2.5-flash"
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    #[serde(default = "default_places_api_language")]
    pub places_api_language: String,

    /// Per-request timeout for provider calls, in seconds
    #[serde(default = "default_places_api_timeout_secs")]
    pub places_api_timeout_secs: u64,

    /// Mandatory delay between paginated search requests; the provider
    /// rejects a fresh page token for about this long after issuing it
    #[serde(default = "default_page_token_delay_secs")]
    pub page_token_delay_secs: u64,

    #[serde(default = "default_image_max_width")]
    pub image_max_width: u32,

    /// Worker-pool bound for concurrent photo uploads
    #[serde(default = "default_max_concurrent_image_uploads")]
    pub max_concurrent_image_uploads: usize,

    /// Uploaded images live under this prefix; the store expires them after 24h
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,

    /// Job result documents live under this prefix; the store expires them after 48h
    #[serde(default = "default_job_result_prefix")]
    pub job_result_prefix: String,

    #[serde(default = "default_food_search_radius")]
    pub food_search_radius: u32,

    #[serde(default = "default_food_max_results")]
    pub food_max_results: usize,

    #[serde(default = "default_attraction_search_radius")]
    pub attraction_search_radius: u32,

    #[serde(default = "default_attraction_max_results")]
    pub attraction_max_results: usize,

    #[serde(default = "default_market_search_radius")]
    pub market_search_radius: u32,

    #[serde(default = "default_market_max_results")]
    pub market_max_results: usize,

    /// Soft length cap for review-based food summaries, communicated via the prompt
    #[serde(default = "default_food_summary_max_length")]
    pub food_summary_max_length: usize,

    /// Soft length cap for attraction/event summaries
    #[serde(default = "default_attraction_summary_max_length")]
    pub attraction_summary_max_length: usize,

    /// Photos fetched per attraction
    #[serde(default = "default_attraction_image_count")]
    pub attraction_image_count: usize,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_places_api_base() -> String {
    "https://maps.googleapis.com/maps/api".to_string()
}

fn default_generative_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_model() -> String {
    "models/gemini-2.5-flash".to_string()
}

fn default_places_api_language() -> String {
    "zh-CN".to_string()
}

fn default_places_api_timeout_secs() -> u64 {
    10
}

fn default_page_token_delay_secs() -> u64 {
    2
}

fn default_image_max_width() -> u32 {
    800
}

fn default_max_concurrent_image_uploads() -> usize {
    5
}

fn default_image_prefix() -> String {
    "poi-images/".to_string()
}

fn default_job_result_prefix() -> String {
    "rcmnd_job/".to_string()
}

fn default_food_search_radius() -> u32 {
    500
}

fn default_food_max_results() -> usize {
    5
}

fn default_attraction_search_radius() -> u32 {
    5000
}

fn default_attraction_max_results() -> usize {
    5
}

fn default_market_search_radius() -> u32 {
    5000
}

fn default_market_max_results() -> usize {
    5
}

fn default_food_summary_max_length() -> usize {
    100
}

fn default_attraction_summary_max_length() -> usize {
    200
}

fn default_attraction_image_count() -> usize {
    3
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid config: {}", e))?;
        Ok(config)
    }

    /// Presence check for the required credentials
    pub fn validate(&self) -> Result<(), String> {
        let mut missing = Vec::new();
        if self.google_places_api_key.is_empty() {
            missing.push("GOOGLE_PLACES_API_KEY");
        }
        if self.gemini_api_key.is_empty() {
            missing.push("GEMINI_API_KEY");
        }
        if self.storage_base_url.is_empty() {
            missing.push("STORAGE_BASE_URL");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("缺少必需的配置项: {}", missing.join(", ")))
        }
    }
}
