//! MSC buffer configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder methods
//! 2. Environment variables (runtime)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use msu_buffer::config::MscConfig;
//!
//! // Use defaults with env overrides
//! let config = MscConfig::from_env();
//!
//! // Or customize programmatically
//! let config = MscConfig::from_env()
//!     .mode(Mode::Single)
//!     .nr_pages(vec![64]);
//! ```

pub mod defaults;

use msu_core::env::{env_get, env_get_bool, env_get_opt};
use msu_core::{Mode, MscError, Result};

/// Buffer configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MscConfig {
    /// Operating mode
    pub mode: Mode,
    /// Wrap enable
    pub wrap: bool,
    /// Window sizes in pages (exactly one entry in single mode)
    pub nr_pages: Vec<usize>,
    /// Burst length override (None: keep what the hardware reports)
    pub burst_len: Option<u32>,
}

impl Default for MscConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl MscConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `MSU_MODE` - Operating mode (single, multi)
    /// - `MSU_WRAP` - Wrap enable (0/1)
    /// - `MSU_NR_PAGES` - Window sizes, comma separated ("4,4,8")
    /// - `MSU_BURST_LEN` - Burst length written to CTL.LEN
    pub fn from_env() -> Self {
        let mode = env_get("MSU_MODE", defaults::MODE);

        let nr_pages = match env_get_opt::<String>("MSU_NR_PAGES") {
            Some(text) => parse_window_sizes(&text, mode).unwrap_or_else(|e| {
                log::warn!("ignoring MSU_NR_PAGES={:?}: {}", text, e);
                defaults::NR_PAGES.to_vec()
            }),
            None => defaults::NR_PAGES.to_vec(),
        };

        Self {
            mode,
            wrap: env_get_bool("MSU_WRAP", defaults::WRAP),
            nr_pages,
            burst_len: env_get_opt("MSU_BURST_LEN"),
        }
    }

    /// Create config with library defaults (no env override).
    pub fn new() -> Self {
        Self {
            mode: defaults::MODE,
            wrap: defaults::WRAP,
            nr_pages: defaults::NR_PAGES.to_vec(),
            burst_len: None,
        }
    }

    // Builder methods

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn wrap(mut self, enable: bool) -> Self {
        self.wrap = enable;
        self
    }

    pub fn nr_pages(mut self, sizes: Vec<usize>) -> Self {
        self.nr_pages = sizes;
        self
    }

    pub fn burst_len(mut self, len: u32) -> Self {
        self.burst_len = Some(len);
        self
    }

    /// Largest window, in blocks
    pub fn max_blocks(&self) -> usize {
        self.nr_pages.iter().copied().max().unwrap_or(0)
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<()> {
        if !self.mode.has_buffer() {
            return Err(MscError::Unsupported(self.mode.raw()));
        }
        if self.nr_pages.is_empty() {
            return Err(MscError::InvalidArgument("nr_pages must not be empty"));
        }
        if self.nr_pages.contains(&0) {
            return Err(MscError::InvalidArgument("window sizes must be > 0"));
        }
        if self.mode == Mode::Single && self.nr_pages.len() != 1 {
            return Err(MscError::InvalidArgument("single mode takes exactly one size"));
        }
        if matches!(self.burst_len, Some(len) if len > defaults::MAX_BURST_LEN) {
            return Err(MscError::InvalidArgument("burst_len must be <= 7"));
        }
        Ok(())
    }

    /// Log configuration (for debugging)
    pub fn log(&self) {
        log::info!("MSC configuration:");
        log::info!("  mode:       {}", self.mode);
        log::info!("  wrap:       {}", self.wrap);
        log::info!("  nr_pages:   {}", format_window_sizes(&self.nr_pages).trim_end());
        match self.burst_len {
            Some(len) => log::info!("  burst_len:  {}", len),
            None => log::info!("  burst_len:  (hardware)"),
        }
    }
}

/// Parse a comma separated list of window sizes.
///
/// A trailing newline is accepted. Every size must be a positive integer;
/// single mode takes exactly one.
pub fn parse_window_sizes(text: &str, mode: Mode) -> Result<Vec<usize>> {
    let text = text.strip_suffix('\n').unwrap_or(text);

    let mut sizes = Vec::new();
    for field in text.split(',') {
        let val: usize = field
            .parse()
            .map_err(|_| MscError::InvalidArgument("window size is not a number"))?;
        if val == 0 {
            return Err(MscError::InvalidArgument("window size must be > 0"));
        }
        if !sizes.is_empty() && mode == Mode::Single {
            return Err(MscError::InvalidArgument("single mode takes exactly one size"));
        }
        sizes.push(val);
    }
    Ok(sizes)
}

/// Render window sizes the way `parse_window_sizes` reads them
pub fn format_window_sizes(sizes: &[usize]) -> String {
    let mut out = sizes
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",");
    out.push('\n');
    out
}
