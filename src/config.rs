use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::llm::{LLMConfig, LLMProvider};
use crate::schema::{FieldSchema, PlaceholderCheck};

/// Configuration for a clinical extraction run
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Model backend settings
    pub llm: LLMConfig,

    /// Required answer fields and input column
    pub schema: SchemaConfig,

    /// Prompt, input and output locations
    pub paths: PathsConfig,

    /// Batch loop settings
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// JSON keys every answer must contain
    pub fields: Vec<String>,

    /// Column holding the report text
    pub input_column: String,

    /// Reject all-"invalid" answers; the provider default when unset
    pub placeholder_check: Option<PlaceholderCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Main prompt template containing `{Results}`
    pub prompt_file: PathBuf,

    /// Verifier template containing `{Results}` and `{draft_json}` (local backend)
    pub verifier_prompt_file: Option<PathBuf>,

    /// Spreadsheet with the input column
    pub input_file: PathBuf,

    /// Directory for derived output files
    pub output_dir: PathBuf,

    /// Explicit output file, bypassing name derivation
    pub output_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Persist the dataset after every N-th row (1-based row index)
    pub checkpoint_interval: usize,

    /// Show a progress bar on stderr
    pub show_progress: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            fields: vec!["decision".to_string(), "evidence".to_string()],
            input_column: "Results".to_string(),
            placeholder_check: None,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            prompt_file: PathBuf::from("prompts/LiverMR.txt"),
            verifier_prompt_file: Some(PathBuf::from("prompts/Breast_Tstage_verifier.txt")),
            input_file: PathBuf::from("data_example/LiverMR_Test.xlsx"),
            output_dir: PathBuf::from("outputs"),
            output_file: None,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 10,
            show_progress: true,
        }
    }
}

impl Config {
    /// Load configuration from an explicit file or the default locations.
    ///
    /// An explicit path must exist and parse. Default locations are
    /// best-effort; with none present the defaults are used. Environment
    /// overrides and credential lookup are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => Self::from_default_locations(),
        };

        config.apply_env_overrides();
        config.llm.resolve_api_key();
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path)?;
        let config = toml::from_str(&config_str).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    fn from_default_locations() -> Self {
        let config_paths = ["clinical-extractor.toml", "config/clinical-extractor.toml"];

        for path in &config_paths {
            let path = Path::new(path);
            if !path.is_file() {
                continue;
            }
            match Self::from_file(path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!("Failed to load config file {}: {}", path.display(), e),
            }
        }

        tracing::debug!("No configuration file found, using defaults");
        Self::default()
    }

    /// Override selected settings from environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(provider) = std::env::var("CLINICAL_EXTRACTOR_PROVIDER") {
            match provider.parse() {
                Ok(provider) => self.llm.provider = provider,
                Err(e) => tracing::warn!("Ignoring CLINICAL_EXTRACTOR_PROVIDER: {}", e),
            }
        }

        if let Ok(model) = std::env::var("CLINICAL_EXTRACTOR_MODEL") {
            self.llm.model = Some(model);
        }

        if let Ok(output_dir) = std::env::var("CLINICAL_EXTRACTOR_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(output_dir);
        }
    }

    /// Validate settings that would otherwise fail mid-run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema.fields.is_empty() {
            return Err(ConfigError::Invalid("schema.fields must name at least one field".into()));
        }

        if self.schema.fields.iter().any(|f| f.trim().is_empty()) {
            return Err(ConfigError::Invalid("schema.fields must not contain blank names".into()));
        }

        if self.schema.input_column.trim().is_empty() {
            return Err(ConfigError::Invalid("schema.input_column must not be empty".into()));
        }

        if self.batch.checkpoint_interval == 0 {
            return Err(ConfigError::Invalid("batch.checkpoint_interval must be greater than 0".into()));
        }

        if self.llm.provider.uses_verifier() && self.paths.verifier_prompt_file.is_none() {
            return Err(ConfigError::Invalid(format!(
                "{} backend requires paths.verifier_prompt_file",
                self.llm.provider
            )));
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    pub fn field_schema(&self) -> FieldSchema {
        FieldSchema::new(self.schema.fields.iter().cloned())
    }

    pub fn placeholder_check(&self) -> PlaceholderCheck {
        self.schema
            .placeholder_check
            .unwrap_or_else(|| self.llm.provider.default_placeholder_check())
    }

    /// Durable output location, explicit or derived
    pub fn output_path(&self) -> PathBuf {
        match &self.paths.output_file {
            Some(path) => path.clone(),
            None => derive_output_path(
                &self.paths.prompt_file,
                &self.llm.model(),
                &self.paths.input_file,
                &self.paths.output_dir,
            ),
        }
    }

    /// Serialize for `--print-config`
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Clinical Extractor Configuration:\n\
            - Provider: {}\n\
            - Model: {}\n\
            - Fields: {}\n\
            - Input Column: {}\n\
            - Placeholder Check: {:?}\n\
            - Prompt: {}\n\
            - Input: {}\n\
            - Output: {}\n\
            - Checkpoint Interval: {}",
            self.llm.provider,
            self.llm.model(),
            self.schema.fields.join(", "),
            self.schema.input_column,
            self.placeholder_check(),
            self.paths.prompt_file.display(),
            self.paths.input_file.display(),
            self.output_path().display(),
            self.batch.checkpoint_interval,
        )
    }
}

/// `_Develop`, `_Test` or `_Temp` from the input file name, first match wins
pub fn output_suffix(input_file: &Path) -> &'static str {
    let name = input_file
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if name.contains("develop") {
        "_Develop"
    } else if name.contains("test") {
        "_Test"
    } else if name.contains("temp") {
        "_Temp"
    } else {
        ""
    }
}

/// `<output_dir>/<prompt stem>_<model, ':' as '_'><suffix>.<ext>`
///
/// The extension follows the input file for CSV inputs, xlsx otherwise.
pub fn derive_output_path(prompt_file: &Path, model: &str, input_file: &Path, output_dir: &Path) -> PathBuf {
    let stem = prompt_file
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let model_suffix = format!("_{}", model.replace(':', "_"));
    let extension = match input_file.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => "csv",
        _ => "xlsx",
    };

    output_dir.join(format!("{}{}{}.{}", stem, model_suffix, output_suffix(input_file), extension))
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    pub fn with_provider(mut self, provider: LLMProvider) -> Self {
        self.config.llm.provider = provider;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.config.llm.model = Some(model.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.llm.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.schema.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_input_column(mut self, column: impl Into<String>) -> Self {
        self.config.schema.input_column = column.into();
        self
    }

    pub fn with_placeholder_check(mut self, check: PlaceholderCheck) -> Self {
        self.config.schema.placeholder_check = Some(check);
        self
    }

    pub fn with_prompt_file(mut self, path: PathBuf) -> Self {
        self.config.paths.prompt_file = path;
        self
    }

    pub fn with_verifier_prompt_file(mut self, path: PathBuf) -> Self {
        self.config.paths.verifier_prompt_file = Some(path);
        self
    }

    pub fn with_input_file(mut self, path: PathBuf) -> Self {
        self.config.paths.input_file = path;
        self
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.config.paths.output_dir = dir;
        self
    }

    pub fn with_output_file(mut self, path: PathBuf) -> Self {
        self.config.paths.output_file = Some(path);
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.config.batch.checkpoint_interval = interval;
        self
    }

    pub fn show_progress(mut self, enable: bool) -> Self {
        self.config.batch.show_progress = enable;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
