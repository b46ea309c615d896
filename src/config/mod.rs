//! Configuration management.
//!
//! Settings are layered: TOML file, then `FALL_AUDIT_*` environment
//! variables, then CLI flags (applied by the binary). The row timeout and the
//! maximum note length have no defaults and must be set by one of the layers.

mod brain;

pub use brain::{BrainDir, DEFAULT_EXECUTABLE, DEFAULT_MODEL};

use crate::prompt::PromptBuilder;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sampling temperature passed to the inference process.
pub const DEFAULT_TEMPERATURE: f32 = 0.03;

/// Argument template used when the prompt is passed on the command line.
pub const ARGUMENT_CHANNEL_ARGS: &[&str] = &[
    "-m",
    "{model}",
    "-p",
    "{prompt}",
    "--temp",
    "{temperature}",
    "--no-display-prompt",
    "--log-disable",
];

/// Argument template used when the prompt is written to standard input.
pub const STDIN_CHANNEL_ARGS: &[&str] = &[
    "-m",
    "{model}",
    "-f",
    "/dev/stdin",
    "--temp",
    "{temperature}",
    "--no-display-prompt",
    "--log-disable",
];

/// How the prompt reaches the inference process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptChannel {
    /// Substituted into the `{prompt}` argument.
    #[default]
    Argument,
    /// Written to the process's standard input, which is then closed.
    Stdin,
}

impl PromptChannel {
    /// Parses a channel name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "argument" | "arg" | "args" => Some(Self::Argument),
            "stdin" => Some(Self::Stdin),
            _ => None,
        }
    }

    /// Returns the default argument template for the channel.
    #[must_use]
    pub fn default_args(self) -> Vec<String> {
        let template = match self {
            Self::Argument => ARGUMENT_CHANNEL_ARGS,
            Self::Stdin => STDIN_CHANNEL_ARGS,
        };
        template.iter().map(|s| (*s).to_string()).collect()
    }
}

/// Main configuration for fall-audit, before validation.
#[derive(Debug, Clone, Default)]
pub struct AuditConfig {
    /// Inference process configuration.
    pub inference: InferenceConfig,
    /// Prompt configuration.
    pub prompt: PromptConfig,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Inference process configuration.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Path to the inference executable.
    pub executable: Option<PathBuf>,
    /// Path to the model weights.
    pub model: Option<PathBuf>,
    /// Folder holding the bundled executable and weights.
    pub brain_dir: Option<PathBuf>,
    /// Per-row execution budget in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Sampling temperature.
    pub temperature: f32,
    /// How the prompt is passed.
    pub prompt_channel: PromptChannel,
    /// Argument template; `None` uses the channel default.
    pub args: Option<Vec<String>>,
    /// Whether to strip an echoed prompt from the start of the output.
    pub strip_prompt_echo: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            executable: None,
            model: None,
            brain_dir: None,
            timeout_ms: None,
            temperature: DEFAULT_TEMPERATURE,
            prompt_channel: PromptChannel::default(),
            args: None,
            strip_prompt_echo: true,
        }
    }
}

/// Prompt configuration.
#[derive(Debug, Clone, Default)]
pub struct PromptConfig {
    /// Notes longer than this many characters are truncated.
    pub max_note_chars: Option<usize>,
    /// Custom template containing a `{note}` placeholder.
    pub template: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LoggingSettings {
    /// Output format: `pretty` or `json`.
    pub format: Option<String>,
    /// Optional log file path (appended to).
    pub file: Option<PathBuf>,
}

/// Validated settings for driving the inference process.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceSettings {
    /// Path to the inference executable.
    pub executable: PathBuf,
    /// Path to the model weights, substituted for `{model}`.
    pub model: Option<PathBuf>,
    /// Argument template with `{model}`, `{prompt}` and `{temperature}` placeholders.
    pub args: Vec<String>,
    /// How the prompt is passed.
    pub prompt_channel: PromptChannel,
    /// Sampling temperature, substituted for `{temperature}`.
    pub temperature: f32,
    /// Whether to strip an echoed prompt from the start of the output.
    pub strip_prompt_echo: bool,
}

impl InferenceSettings {
    /// Creates settings for an executable using the argument channel defaults.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            model: None,
            args: PromptChannel::Argument.default_args(),
            prompt_channel: PromptChannel::Argument,
            temperature: DEFAULT_TEMPERATURE,
            strip_prompt_echo: true,
        }
    }

    /// Sets the model weights path.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<PathBuf>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Replaces the argument template.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the prompt channel.
    #[must_use]
    pub const fn with_prompt_channel(mut self, channel: PromptChannel) -> Self {
        self.prompt_channel = channel;
        self
    }

    /// Enables or disables prompt echo stripping.
    #[must_use]
    pub const fn with_strip_prompt_echo(mut self, strip: bool) -> Self {
        self.strip_prompt_echo = strip;
        self
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ConfigFile {
    /// Inference section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference: Option<ConfigFileInference>,
    /// Prompt section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<ConfigFilePrompt>,
    /// Logging section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<ConfigFileLogging>,
}

/// Inference section in config file.
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ConfigFileInference {
    /// Executable path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    /// Model weights path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Brain folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brain_dir: Option<String>,
    /// Row timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// `argument` or `stdin`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_channel: Option<String>,
    /// Argument template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Prompt echo stripping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strip_prompt_echo: Option<bool>,
}

/// Prompt section in config file.
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ConfigFilePrompt {
    /// Maximum note length in characters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_note_chars: Option<usize>,
    /// Custom template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ConfigFileLogging {
    /// `pretty` or `json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Log file path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl ConfigFile {
    /// Reads a config file, returning an empty one if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn read_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        toml::from_str(&contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })
    }

    /// Writes the config file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| Error::OperationFailed {
            operation: "serialize_config_file".to_string(),
            cause: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_config_dir".to_string(),
                cause: format!("{}: {e}", parent.display()),
            })?;
        }
        std::fs::write(path, contents).map_err(|e| Error::OperationFailed {
            operation: "write_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })
    }
}

impl AuditConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        let file: ConfigFile = toml::from_str(&contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        Self::from_config_file(file)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the following paths in order:
    /// 1. Platform-specific config dir (`~/Library/Application Support/fall-audit/` on macOS)
    /// 2. XDG config dir (`~/.config/fall-audit/`)
    ///
    /// Returns default configuration if no config file is found.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but is invalid.
    pub fn load_default() -> Result<Self> {
        match existing_default_path() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Converts a `ConfigFile` to `AuditConfig`.
    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(inference) = file.inference {
            config.inference.executable = inference.executable.map(PathBuf::from);
            config.inference.model = inference.model.map(PathBuf::from);
            config.inference.brain_dir = inference.brain_dir.map(PathBuf::from);
            config.inference.timeout_ms = inference.timeout_ms;
            if let Some(temperature) = inference.temperature {
                config.inference.temperature = temperature;
            }
            if let Some(channel) = inference.prompt_channel {
                config.inference.prompt_channel =
                    PromptChannel::parse(&channel).ok_or_else(|| {
                        Error::InvalidInput(format!(
                            "unknown prompt_channel '{channel}' (expected 'argument' or 'stdin')"
                        ))
                    })?;
            }
            config.inference.args = inference.args;
            if let Some(strip) = inference.strip_prompt_echo {
                config.inference.strip_prompt_echo = strip;
            }
        }
        if let Some(prompt) = file.prompt {
            config.prompt.max_note_chars = prompt.max_note_chars;
            config.prompt.template = prompt.template;
        }
        if let Some(logging) = file.logging {
            config.logging.format = logging.format;
            config.logging.file = logging.file.map(PathBuf::from);
        }

        Ok(config)
    }

    /// Applies `FALL_AUDIT_*` environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a numeric variable does not parse.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from a key lookup (environment or test double).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the variable if
    /// `FALL_AUDIT_TIMEOUT_MS`, `FALL_AUDIT_MAX_NOTE_CHARS` or
    /// `FALL_AUDIT_TEMPERATURE` is set to something that does not parse.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FALL_AUDIT_EXECUTABLE") {
            self.inference.executable = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FALL_AUDIT_MODEL") {
            self.inference.model = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FALL_AUDIT_BRAIN_DIR") {
            self.inference.brain_dir = Some(PathBuf::from(v));
        }
        if let Some(timeout_ms) =
            parse_override(&lookup, "FALL_AUDIT_TIMEOUT_MS", "a whole number of milliseconds")?
        {
            self.inference.timeout_ms = Some(timeout_ms);
        }
        if let Some(temperature) =
            parse_override(&lookup, "FALL_AUDIT_TEMPERATURE", "a decimal number")?
        {
            self.inference.temperature = temperature;
        }
        if let Some(max) =
            parse_override(&lookup, "FALL_AUDIT_MAX_NOTE_CHARS", "a whole number of characters")?
        {
            self.prompt.max_note_chars = Some(max);
        }
        Ok(self)
    }

    /// Returns the per-row execution budget.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `timeout_ms` is unset or zero.
    pub fn row_timeout(&self) -> Result<Duration> {
        match self.inference.timeout_ms {
            Some(0) => Err(Error::InvalidInput(
                "timeout_ms must be greater than zero".to_string(),
            )),
            Some(ms) => Ok(Duration::from_millis(ms)),
            None => Err(Error::InvalidInput(
                "row timeout is required: set [inference] timeout_ms, FALL_AUDIT_TIMEOUT_MS or --timeout-ms"
                    .to_string(),
            )),
        }
    }

    /// Builds the prompt builder from the prompt section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `max_note_chars` is unset or the
    /// template has no `{note}` placeholder.
    pub fn prompt_builder(&self) -> Result<PromptBuilder> {
        let max_note_chars = self.prompt.max_note_chars.ok_or_else(|| {
            Error::InvalidInput(
                "maximum note length is required: set [prompt] max_note_chars, FALL_AUDIT_MAX_NOTE_CHARS or --max-note-chars"
                    .to_string(),
            )
        })?;
        let builder = PromptBuilder::new(max_note_chars);
        match self.prompt.template.as_deref() {
            Some(template) => builder.with_template(template),
            None => Ok(builder),
        }
    }

    /// Resolves executable, model and arguments into inference settings.
    ///
    /// Explicit paths win over paths inside `brain_dir`. Nothing is checked on
    /// disk here; that happens in the invoker's preflight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if no executable can be determined, the
    /// template needs `{model}` but no model is known, or the argument channel
    /// is selected without a `{prompt}` placeholder.
    pub fn inference_settings(&self) -> Result<InferenceSettings> {
        let brain = self.inference.brain_dir.as_ref().map(BrainDir::new);

        let executable = self
            .inference
            .executable
            .clone()
            .or_else(|| brain.as_ref().map(BrainDir::executable))
            .ok_or_else(|| {
                Error::InvalidInput(
                    "no inference executable configured: set executable or brain_dir".to_string(),
                )
            })?;
        let model = self
            .inference
            .model
            .clone()
            .or_else(|| brain.as_ref().map(BrainDir::model));

        let channel = self.inference.prompt_channel;
        let args = self
            .inference
            .args
            .clone()
            .unwrap_or_else(|| channel.default_args());

        if model.is_none() && args.iter().any(|a| a.contains("{model}")) {
            return Err(Error::InvalidInput(
                "argument template uses {model} but no model or brain_dir is configured"
                    .to_string(),
            ));
        }
        if channel == PromptChannel::Argument && !args.iter().any(|a| a.contains("{prompt}")) {
            return Err(Error::InvalidInput(
                "prompt_channel 'argument' requires a {prompt} placeholder in args".to_string(),
            ));
        }

        Ok(InferenceSettings {
            executable,
            model,
            args,
            prompt_channel: channel,
            temperature: self.inference.temperature,
            strip_prompt_echo: self.inference.strip_prompt_echo,
        })
    }

    /// Records the brain folder in the config file at `path`.
    ///
    /// The folder must contain the bundled executable and weights. Other
    /// settings already in the file are preserved.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder is incomplete or the file cannot be
    /// read or written.
    pub fn save_brain_dir(path: &Path, brain_dir: &Path) -> Result<()> {
        BrainDir::new(brain_dir).validate()?;
        let mut file = ConfigFile::read_or_default(path)?;
        file.inference
            .get_or_insert_with(ConfigFileInference::default)
            .brain_dir = Some(brain_dir.display().to_string());
        file.write(path)
    }
}

/// Parses a numeric override, naming the variable when the value is malformed.
fn parse_override<T, F>(lookup: &F, key: &str, expected: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse().map_err(|_| {
                Error::InvalidInput(format!("{key} must be {expected}, got '{raw}'"))
            })
        })
        .transpose()
}

/// Returns the preferred location for the config file.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.config_dir().join("fall-audit").join("config.toml"))
}

/// Returns the first existing default config file.
fn existing_default_path() -> Option<PathBuf> {
    let base_dirs = directories::BaseDirs::new()?;

    let platform_config = base_dirs.config_dir().join("fall-audit").join("config.toml");
    if platform_config.exists() {
        return Some(platform_config);
    }

    let xdg_config = base_dirs
        .home_dir()
        .join(".config")
        .join("fall-audit")
        .join("config.toml");
    xdg_config.exists().then_some(xdg_config)
}
