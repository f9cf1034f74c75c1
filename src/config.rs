use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the retrieval engine and its HTTP shell.
#[derive(Debug, Clone)]
pub struct Config {
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Optional base URL override for the embedding provider.
    pub embedding_base_url: Option<String>,
    /// API key used by OpenAI-compatible providers.
    pub openai_api_key: Option<String>,
    /// Upper bound on attempts for one embedding call, including the first.
    pub embedding_max_attempts: u32,
    /// Base delay of the exponential backoff between embedding attempts.
    pub embedding_retry_base_ms: u64,
    /// Provider that turns retrieved context into prose.
    pub generation_provider: GenerationProvider,
    /// Generation model identifier.
    pub generation_model: String,
    /// Optional base URL override for the generation provider.
    pub generation_base_url: Option<String>,
    /// Optional override for the automatic chunk size selection.
    pub text_splitter_chunk_size: Option<usize>,
    /// Token overlap carried between consecutive text fragments.
    pub text_splitter_chunk_overlap: usize,
    /// Prefer smaller automatic chunk sizes.
    pub text_splitter_use_safe_defaults: bool,
    /// Results per partition for textual and visual questions.
    pub top_k_default: usize,
    /// Results per partition for exploratory questions.
    pub top_k_exploratory: usize,
    /// Maximum fragments handed to the answer composer.
    pub max_context_fragments: usize,
    /// OCR backend used for images and scanned pages.
    pub ocr_engine: OcrEngineKind,
    /// Path or name of the tesseract executable.
    pub tesseract_path: String,
    /// Extra visual-reference terms appended to the router defaults.
    pub router_visual_terms: Vec<String>,
    /// Extra exploratory terms appended to the router defaults.
    pub router_exploratory_terms: Vec<String>,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Directory holding the on-disk index snapshot.
    pub index_snapshot_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding_provider: EmbeddingProvider::Hashed,
            embedding_model: EmbeddingProvider::Hashed.default_model().to_string(),
            embedding_dimension: EmbeddingProvider::Hashed.default_dimension(),
            embedding_base_url: None,
            openai_api_key: None,
            embedding_max_attempts: 3,
            embedding_retry_base_ms: 250,
            generation_provider: GenerationProvider::None,
            generation_model: GenerationProvider::None.default_model().to_string(),
            generation_base_url: None,
            text_splitter_chunk_size: None,
            text_splitter_chunk_overlap: 32,
            text_splitter_use_safe_defaults: false,
            top_k_default: 1,
            top_k_exploratory: 5,
            max_context_fragments: 5,
            ocr_engine: OcrEngineKind::Tesseract,
            tesseract_path: "tesseract".to_string(),
            router_visual_terms: Vec::new(),
            router_exploratory_terms: Vec::new(),
            server_port: None,
            index_snapshot_dir: None,
        }
    }
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Deterministic local feature-hashing embedder.
    Hashed,
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
}

impl EmbeddingProvider {
    /// Model used when `EMBEDDING_MODEL` is not set.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Hashed => "feature-hash-v1",
            Self::Ollama => "nomic-embed-text",
            Self::OpenAI => "text-embedding-3-small",
        }
    }

    /// Dimension used when `EMBEDDING_DIMENSION` is not set.
    pub fn default_dimension(self) -> usize {
        match self {
            Self::Hashed => 384,
            Self::Ollama => 768,
            Self::OpenAI => 1536,
        }
    }
}

/// Supported answer generation backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationProvider {
    /// No generation; answers are assembled extractively.
    None,
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI chat completions API.
    OpenAI,
}

impl GenerationProvider {
    /// Model used when `GENERATION_MODEL` is not set.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Ollama => "llama3.2",
            Self::OpenAI => "gpt-4o-mini",
        }
    }
}

/// OCR backends available to the fragment extractor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OcrEngineKind {
    /// Shell out to the tesseract CLI.
    Tesseract,
    /// Never recognise text.
    None,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let embedding_provider = match load_env_optional("EMBEDDING_PROVIDER") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            None => defaults.embedding_provider,
        };
        let generation_provider = match load_env_optional("GENERATION_PROVIDER") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("GENERATION_PROVIDER".to_string()))?,
            None => defaults.generation_provider,
        };
        let ocr_engine = match load_env_optional("OCR_ENGINE") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("OCR_ENGINE".to_string()))?,
            None => defaults.ocr_engine,
        };
        let openai_api_key = load_env_optional("OPENAI_API_KEY");
        let uses_openai = embedding_provider == EmbeddingProvider::OpenAI
            || generation_provider == GenerationProvider::OpenAI;
        if uses_openai && openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".to_string()));
        }

        Ok(Self {
            embedding_provider,
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| embedding_provider.default_model().to_string()),
            embedding_dimension: parse_optional("EMBEDDING_DIMENSION")?
                .unwrap_or_else(|| embedding_provider.default_dimension()),
            embedding_base_url: load_env_optional("EMBEDDING_BASE_URL"),
            openai_api_key,
            embedding_max_attempts: parse_optional("EMBEDDING_MAX_ATTEMPTS")?
                .unwrap_or(defaults.embedding_max_attempts)
                .max(1),
            embedding_retry_base_ms: parse_optional("EMBEDDING_RETRY_BASE_MS")?
                .unwrap_or(defaults.embedding_retry_base_ms),
            generation_provider,
            generation_model: load_env_optional("GENERATION_MODEL")
                .unwrap_or_else(|| generation_provider.default_model().to_string()),
            generation_base_url: load_env_optional("GENERATION_BASE_URL"),
            text_splitter_chunk_size: parse_optional("TEXT_SPLITTER_CHUNK_SIZE")?,
            text_splitter_chunk_overlap: parse_optional("TEXT_SPLITTER_CHUNK_OVERLAP")?
                .unwrap_or(defaults.text_splitter_chunk_overlap),
            text_splitter_use_safe_defaults: load_env_optional("TEXT_SPLITTER_USE_SAFE_DEFAULTS")
                .map(|value| parse_flag(&value))
                .unwrap_or(false),
            top_k_default: parse_optional("TOP_K_DEFAULT")?
                .unwrap_or(defaults.top_k_default)
                .max(1),
            top_k_exploratory: parse_optional("TOP_K_EXPLORATORY")?
                .unwrap_or(defaults.top_k_exploratory)
                .max(1),
            max_context_fragments: parse_optional("MAX_CONTEXT_FRAGMENTS")?
                .unwrap_or(defaults.max_context_fragments)
                .max(1),
            ocr_engine,
            tesseract_path: load_env_optional("TESSERACT_PATH")
                .unwrap_or(defaults.tesseract_path),
            router_visual_terms: load_env_optional("ROUTER_VISUAL_TERMS")
                .map(|value| parse_list(&value))
                .unwrap_or_default(),
            router_exploratory_terms: load_env_optional("ROUTER_EXPLORATORY_TERMS")
                .map(|value| parse_list(&value))
                .unwrap_or_default(),
            server_port: parse_optional("SERVER_PORT")?,
            index_snapshot_dir: load_env_optional("INDEX_SNAPSHOT_DIR").map(PathBuf::from),
        })
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hashed" | "local" => Ok(Self::Hashed),
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for GenerationProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for OcrEngineKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tesseract" => Ok(Self::Tesseract),
            "none" | "off" => Ok(Self::None),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        embedding_provider = ?config.embedding_provider,
        embedding_model = %config.embedding_model,
        embedding_dimension = config.embedding_dimension,
        generation_provider = ?config.generation_provider,
        ocr_engine = ?config.ocr_engine,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
