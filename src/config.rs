//! Configuration and color scheme management for zpanel.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.zpanel/config.toml`
//! - The managed zsh configuration (`~/.zpanel/zshrc`), synthesized
//!   from a fixed template on first use and sourced by the panel shell
//! - Built-in color schemes (default, nord, dracula)
//!
//! # Configuration File
//!
//! The configuration file is located at `~/.zpanel/config.toml`:
//!
//! ```toml
//! # Shell binary (optional, defaults to $SHELL or /bin/zsh)
//! shell = "/bin/zsh"
//!
//! # Panel height as a fraction of the terminal height
//! panel_fraction = 0.35
//!
//! # Prefix key (Ctrl+<char>)
//! prefix_key = "b"
//!
//! # Color scheme: default, nord, dracula
//! color_scheme = "default"
//!
//! # Open the zshrc in $EDITOR when it is first synthesized
//! auto_edit = false
//!
//! [completion]
//! enabled = true
//! timeout_ms = 500
//! ```
//!
//! The zshrc is consumed verbatim by zsh at session launch; zpanel
//! never parses or migrates its contents.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

/// Default template for the managed zshrc.
///
/// Written once when the file is absent; afterwards the user owns it.
pub const ZSHRC_TEMPLATE: &str = r#"# zpanel managed zsh configuration.
# Sourced by the panel shell at startup; edit freely.

HISTFILE="$HOME/.zpanel/history"
HISTSIZE=10000
SAVEHIST=10000

bindkey -e

setopt autocd
setopt interactive_comments
setopt hist_ignore_dups
setopt hist_ignore_space
setopt share_history

autoload -Uz compinit && compinit

PROMPT='%F{green}%n%f %F{blue}%1~%f %# '

alias ll='ls -lh'
alias la='ls -lhA'
alias ..='cd ..'
alias g='git'
alias grep='grep --color=auto'
"#;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell binary path
    pub shell: Option<String>,
    /// Panel height as a fraction of the terminal height
    pub panel_fraction: f32,
    /// Prefix key character (Ctrl+<char>)
    pub prefix_key: String,
    /// Color scheme name
    pub color_scheme: String,
    /// Open the zshrc in $EDITOR when it is first synthesized
    pub auto_edit: bool,
    /// Completion settings
    pub completion: CompletionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            panel_fraction: 0.35,
            prefix_key: "b".to_string(),
            color_scheme: "default".to_string(),
            auto_edit: false,
            completion: CompletionConfig::default(),
        }
    }
}

/// Completion bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 500,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(store: &ConfigStore) -> Self {
        let path = store.config_path();
        if path.exists() {
            if let Ok(content) = fs::read_to_string(&path) {
                if let Ok(config) = toml::from_str(&content) {
                    return config;
                }
            }
        }
        Self::default()
    }

    /// Save configuration to file
    #[allow(dead_code)]
    pub fn save(&self, store: &ConfigStore) -> Result<(), String> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(store.config_path(), content)
            .map_err(|e| format!("Failed to write config: {}", e))?;
        Ok(())
    }

    /// Resolve the shell binary: config, then $SHELL, then /bin/zsh
    pub fn resolve_shell(&self) -> PathBuf {
        if let Some(ref shell) = self.shell {
            return PathBuf::from(shell);
        }
        if let Ok(shell) = std::env::var("SHELL") {
            if !shell.is_empty() {
                return PathBuf::from(shell);
            }
        }
        PathBuf::from("/bin/zsh")
    }

    /// Get the color scheme
    pub fn get_color_scheme(&self) -> ColorScheme {
        ColorScheme::by_name(&self.color_scheme)
    }
}

/// Prefix key (Ctrl+<char>)
#[derive(Debug, Clone, Copy)]
pub struct PrefixKey {
    pub char: char,
}

impl PrefixKey {
    /// Parse from config string: a single ASCII lowercase letter
    pub fn parse(s: &str) -> Option<Self> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_lowercase() => Some(Self { char: c }),
            _ => None,
        }
    }
}

/// Result of materializing the zshrc
#[derive(Debug)]
pub struct EnsureOutcome {
    /// Path to the zshrc
    pub path: PathBuf,
    /// Whether the file was synthesized by this call
    pub created: bool,
}

/// On-disk state under the configuration directory.
///
/// Owns the layout `~/.zpanel/{config.toml, zshrc, zpanel.log}`.
/// Missing pieces are never errors; they are created on demand.
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    /// Store rooted at `~/.zpanel`
    pub fn new() -> Option<Self> {
        dirs::home_dir().map(|home| Self {
            dir: home.join(".zpanel"),
        })
    }

    /// Store rooted at an explicit directory
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join("config.toml")
    }

    pub fn zshrc_path(&self) -> PathBuf {
        self.dir.join("zshrc")
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join("zpanel.log")
    }

    /// Materialize the configuration directory and the zshrc.
    ///
    /// Creates the directory recursively if absent and writes the fixed
    /// template if the file is absent. An existing file is returned
    /// untouched; content is never validated.
    pub fn ensure_zshrc(&self) -> io::Result<EnsureOutcome> {
        fs::create_dir_all(&self.dir)?;
        let path = self.zshrc_path();
        if path.exists() {
            return Ok(EnsureOutcome {
                path,
                created: false,
            });
        }
        fs::write(&path, ZSHRC_TEMPLATE)?;
        info!("Synthesized zshrc at {}", path.display());
        Ok(EnsureOutcome {
            path,
            created: true,
        })
    }

    /// Open the zshrc in an editor, materializing it first.
    ///
    /// The ensure step is repeated here so editing works even when the
    /// session was never started.
    pub fn edit_zshrc(&self, editor: &str) -> io::Result<std::process::ExitStatus> {
        let outcome = self.ensure_zshrc()?;
        std::process::Command::new(editor)
            .arg(&outcome.path)
            .status()
    }
}

/// Color definition (RGB)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Convert to crossterm Color
    pub fn to_crossterm(&self) -> crossterm::style::Color {
        crossterm::style::Color::Rgb {
            r: self.r,
            g: self.g,
            b: self.b,
        }
    }
}

/// Color scheme definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorScheme {
    pub name: String,

    // Panel colors
    pub panel_border: Color,
    pub panel_border_focused: Color,
    pub panel_title: Color,
    pub output_fg: Color,

    // Status bar colors
    pub status_bar_bg: Color,
    pub status_bar_fg: Color,

    // Notification colors
    pub notify_bg: Color,
    pub notify_fg: Color,

    // Completion popup colors
    pub popup_bg: Color,
    pub popup_fg: Color,
    pub popup_selected_bg: Color,
    pub popup_selected_fg: Color,

    // Host area accents
    pub host_accent: Color,
    pub host_dim: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self::default_scheme()
    }
}

impl ColorScheme {
    /// Default color scheme
    pub fn default_scheme() -> Self {
        Self {
            name: "default".to_string(),

            panel_border: Color::new(80, 80, 80),
            panel_border_focused: Color::new(100, 150, 255),
            panel_title: Color::new(180, 180, 180),
            output_fg: Color::new(220, 220, 220),

            status_bar_bg: Color::new(0, 100, 0),
            status_bar_fg: Color::new(255, 255, 255),

            notify_bg: Color::new(200, 160, 0),
            notify_fg: Color::new(0, 0, 0),

            popup_bg: Color::new(0, 0, 139),
            popup_fg: Color::new(255, 255, 255),
            popup_selected_bg: Color::new(255, 255, 255),
            popup_selected_fg: Color::new(0, 0, 0),

            host_accent: Color::new(100, 150, 255),
            host_dim: Color::new(130, 130, 130),
        }
    }

    /// Nord scheme
    pub fn nord() -> Self {
        Self {
            name: "nord".to_string(),

            panel_border: Color::new(59, 66, 82),
            panel_border_focused: Color::new(136, 192, 208),
            panel_title: Color::new(216, 222, 233),
            output_fg: Color::new(216, 222, 233),

            status_bar_bg: Color::new(59, 66, 82),
            status_bar_fg: Color::new(216, 222, 233),

            notify_bg: Color::new(163, 190, 140),
            notify_fg: Color::new(46, 52, 64),

            popup_bg: Color::new(46, 52, 64),
            popup_fg: Color::new(216, 222, 233),
            popup_selected_bg: Color::new(136, 192, 208),
            popup_selected_fg: Color::new(46, 52, 64),

            host_accent: Color::new(136, 192, 208),
            host_dim: Color::new(147, 161, 181),
        }
    }

    /// Dracula scheme
    pub fn dracula() -> Self {
        Self {
            name: "dracula".to_string(),

            panel_border: Color::new(68, 71, 90),
            panel_border_focused: Color::new(189, 147, 249),
            panel_title: Color::new(248, 248, 242),
            output_fg: Color::new(248, 248, 242),

            status_bar_bg: Color::new(68, 71, 90),
            status_bar_fg: Color::new(248, 248, 242),

            notify_bg: Color::new(80, 250, 123),
            notify_fg: Color::new(40, 42, 54),

            popup_bg: Color::new(40, 42, 54),
            popup_fg: Color::new(248, 248, 242),
            popup_selected_bg: Color::new(189, 147, 249),
            popup_selected_fg: Color::new(40, 42, 54),

            host_accent: Color::new(189, 147, 249),
            host_dim: Color::new(98, 114, 164),
        }
    }

    /// Get scheme by name
    pub fn by_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "nord" => Self::nord(),
            "dracula" => Self::dracula(),
            _ => Self::default_scheme(),
        }
    }

    /// List available schemes
    #[allow(dead_code)]
    pub fn list() -> Vec<&'static str> {
        vec!["default", "nord", "dracula"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_zshrc_creates_template() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::with_dir(tmp.path().join("conf"));

        let outcome = store.ensure_zshrc().unwrap();
        assert!(outcome.created);
        assert!(store.dir().is_dir());
        assert_eq!(fs::read_to_string(&outcome.path).unwrap(), ZSHRC_TEMPLATE);
    }

    #[test]
    fn test_ensure_zshrc_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::with_dir(tmp.path().to_path_buf());

        let first = store.ensure_zshrc().unwrap();
        // User edits survive the second call untouched
        fs::write(&first.path, "alias mine='echo mine'\n").unwrap();
        let second = store.ensure_zshrc().unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(
            fs::read_to_string(&second.path).unwrap(),
            "alias mine='echo mine'\n"
        );
    }

    #[test]
    fn test_ensure_zshrc_byte_identical_without_edits() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::with_dir(tmp.path().to_path_buf());

        let first = store.ensure_zshrc().unwrap();
        let before = fs::read(&first.path).unwrap();
        let second = store.ensure_zshrc().unwrap();
        let after = fs::read(&second.path).unwrap();

        assert_eq!(before, after);
        assert!(!second.created);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert!((config.panel_fraction - 0.35).abs() < f32::EPSILON);
        assert_eq!(config.prefix_key, "b");
        assert!(config.completion.enabled);
        assert_eq!(config.completion.timeout_ms, 500);
    }

    #[test]
    fn test_config_load_fallback_on_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::with_dir(tmp.path().to_path_buf());
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.config_path(), "not = [valid").unwrap();

        let config = Config::load(&store);
        assert_eq!(config.color_scheme, "default");
    }

    #[test]
    fn test_config_load_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::with_dir(tmp.path().to_path_buf());
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(
            store.config_path(),
            "panel_fraction = 0.5\n[completion]\ntimeout_ms = 250\n",
        )
        .unwrap();

        let config = Config::load(&store);
        assert!((config.panel_fraction - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.completion.timeout_ms, 250);
        // Untouched fields keep their defaults
        assert!(config.completion.enabled);
        assert_eq!(config.prefix_key, "b");
    }

    #[test]
    fn test_prefix_key_parse() {
        assert_eq!(PrefixKey::parse("b").map(|p| p.char), Some('b'));
        assert_eq!(PrefixKey::parse("a").map(|p| p.char), Some('a'));
        assert!(PrefixKey::parse("").is_none());
        assert!(PrefixKey::parse("ab").is_none());
        assert!(PrefixKey::parse("B").is_none());
    }

    #[test]
    fn test_scheme_by_name() {
        assert_eq!(ColorScheme::by_name("nord").name, "nord");
        assert_eq!(ColorScheme::by_name("Dracula").name, "dracula");
        assert_eq!(ColorScheme::by_name("unknown").name, "default");
    }

    #[test]
    fn test_template_shape() {
        // The template carries history settings, key bindings, options,
        // completion init, a prompt, and five aliases.
        assert!(ZSHRC_TEMPLATE.contains("HISTFILE="));
        assert!(ZSHRC_TEMPLATE.contains("HISTSIZE="));
        assert!(ZSHRC_TEMPLATE.contains("bindkey -e"));
        assert!(ZSHRC_TEMPLATE.contains("compinit"));
        assert!(ZSHRC_TEMPLATE.contains("PROMPT="));
        assert_eq!(ZSHRC_TEMPLATE.matches("alias ").count(), 5);
    }
}
