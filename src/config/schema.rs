use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const CONFIG_DIR_NAME: &str = ".clubllm";
const DATABASE_FILENAME: &str = "clubllm.db";

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Workspace directory - computed from home, not serialized
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub conversation: ConversationConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_model() -> String {
    "deepseek/deepseek-chat".into()
}

fn default_temperature() -> f64 {
    0.7
}

// ── Completion provider (OpenRouter) ─────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// OpenAI-compatible API root (default: OpenRouter)
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    /// Sent as `HTTP-Referer`; OpenRouter uses it for app attribution
    #[serde(default = "default_site_url")]
    pub site_url: String,
    /// Sent as `X-Title`
    #[serde(default = "default_app_title")]
    pub app_title: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-conversation history kept for the provider, excluding the system prompt
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
    /// Conversations with provider-side history kept at once; least recently used go first
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_provider_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

fn default_site_url() -> String {
    "http://localhost:3000".into()
}

fn default_app_title() -> String {
    "ClubLLM".into()
}

fn default_system_prompt() -> String {
    "You are ClubLLM, a helpful AI assistant. Be concise, friendly, and informative.".into()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_max_history_messages() -> usize {
    40
}

fn default_max_conversations() -> usize {
    1000
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            site_url: default_site_url(),
            app_title: default_app_title(),
            system_prompt: default_system_prompt(),
            max_tokens: default_max_tokens(),
            max_history_messages: default_max_history_messages(),
            max_conversations: default_max_conversations(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ── Conversation lifecycle ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Upper bound on one completion call before the placeholder is failed
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// A signed-in user's in-memory sessions are dropped after this long unused
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

fn default_send_timeout_secs() -> u64 {
    60
}

fn default_idle_ttl_secs() -> u64 {
    6 * 60 * 60
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: default_send_timeout_secs(),
            idle_ttl_secs: default_idle_ttl_secs(),
        }
    }
}

// ── Durable chat history ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Mirror completed exchanges of signed-in users (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// SQLite file; relative paths resolve against the workspace
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from(DATABASE_FILENAME)
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    250
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database_path: default_database_path(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
        }
    }
}

// ── Accounts ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Session token lifetime (default: 7 days)
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u64,
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
    /// Mark the session cookie `Secure` (enable behind HTTPS)
    #[serde(default)]
    pub cookie_secure: bool,
}

fn default_token_ttl_hours() -> u64 {
    24 * 7
}

fn default_min_password_len() -> usize {
    6
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_hours: default_token_ttl_hours(),
            min_password_len: default_min_password_len(),
            cookie_secure: false,
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway port (default: 3001)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Allow binding to non-localhost (default: false)
    #[serde(default)]
    pub allow_public_bind: bool,
    /// Browser origin allowed to call the API with credentials
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

fn default_gateway_port() -> u16 {
    3001
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_cors_origin() -> String {
    "http://localhost:3000".into()
}

fn default_true() -> bool {
    true
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
            allow_public_bind: false,
            cors_origin: default_cors_origin(),
        }
    }
}

// ── Config impl ──────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let home =
            UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
        let clubllm_dir = home.join(CONFIG_DIR_NAME);

        Self {
            workspace_dir: clubllm_dir.join("workspace"),
            config_path: clubllm_dir.join("config.toml"),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            provider: ProviderConfig::default(),
            conversation: ConversationConfig::default(),
            persistence: PersistenceConfig::default(),
            auth: AuthConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let clubllm_dir = home.join(CONFIG_DIR_NAME);
        let config_path = clubllm_dir.join("config.toml");

        if !clubllm_dir.exists() {
            fs::create_dir_all(&clubllm_dir).context("Failed to create .clubllm directory")?;
        }
        fs::create_dir_all(clubllm_dir.join("workspace"))
            .context("Failed to create workspace directory")?;

        let mut config = if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            // Set computed paths that are skipped during serialization
            config.config_path.clone_from(&config_path);
            config.workspace_dir = clubllm_dir.join("workspace");
            config
        } else {
            let config = Self {
                config_path: config_path.clone(),
                workspace_dir: clubllm_dir.join("workspace"),
                ..Self::default()
            };
            config.save()?;
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        // API Key: CLUBLLM_API_KEY, OPENROUTER_API_KEY or API_KEY
        if let Ok(key) = std::env::var("CLUBLLM_API_KEY")
            .or_else(|_| std::env::var("OPENROUTER_API_KEY"))
            .or_else(|_| std::env::var("API_KEY"))
        {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }

        // Model: CLUBLLM_MODEL
        if let Ok(model) = std::env::var("CLUBLLM_MODEL") {
            if !model.is_empty() {
                self.model = model;
            }
        }

        // Workspace directory: CLUBLLM_WORKSPACE
        if let Ok(workspace) = std::env::var("CLUBLLM_WORKSPACE") {
            if !workspace.is_empty() {
                self.workspace_dir = PathBuf::from(workspace);
            }
        }

        // Gateway port: CLUBLLM_GATEWAY_PORT or PORT
        if let Ok(port_str) =
            std::env::var("CLUBLLM_GATEWAY_PORT").or_else(|_| std::env::var("PORT"))
        {
            if let Ok(port) = port_str.parse::<u16>() {
                self.gateway.port = port;
            }
        }

        // Gateway host: CLUBLLM_GATEWAY_HOST
        if let Ok(host) = std::env::var("CLUBLLM_GATEWAY_HOST") {
            if !host.is_empty() {
                self.gateway.host = host;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (0.0..=2.0).contains(&self.temperature),
            "temperature must be between 0.0 and 2.0 (got {})",
            self.temperature
        );
        anyhow::ensure!(
            self.conversation.send_timeout_secs > 0,
            "conversation.send_timeout_secs must be greater than zero"
        );
        anyhow::ensure!(
            self.provider.request_timeout_secs > 0,
            "provider.request_timeout_secs must be greater than zero"
        );
        anyhow::ensure!(
            self.provider.max_conversations > 0,
            "provider.max_conversations must be at least 1"
        );
        anyhow::ensure!(
            self.conversation.idle_ttl_secs > 0,
            "conversation.idle_ttl_secs must be greater than zero"
        );
        anyhow::ensure!(
            self.auth.min_password_len > 0,
            "auth.min_password_len must be at least 1"
        );
        anyhow::ensure!(
            self.auth.token_ttl_hours > 0,
            "auth.token_ttl_hours must be greater than zero"
        );
        Ok(())
    }

    /// Location of the SQLite database backing accounts and chat history.
    pub fn database_path(&self) -> PathBuf {
        if self.persistence.database_path.is_absolute() {
            self.persistence.database_path.clone()
        } else {
            self.workspace_dir.join(&self.persistence.database_path)
        }
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }
}
