//! Runtime configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! application_name = "shop"
//! sweep_interval = 64
//! custom_errors = true
//!
//! [[well_known]]
//! uri = "cart.rem"
//! type_name = "Cart"
//! mode = "single_call"
//! ```

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::RemotingError;
use crate::object::ObjectFactory;
use crate::well_known::WellKnownMode;

/// Default number of identity insertions between weak-entry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: usize = 64;

/// Errors that can occur when loading or applying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error parsing TOML syntax or shape.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// A value is out of range.
	#[error("invalid value for `{field}`: {reason}")]
	InvalidValue {
		/// Offending field.
		field: &'static str,
		/// Why it was rejected.
		reason: String,
	},

	/// A well-known entry names a type missing from the catalog.
	#[error("unknown server type: {0}")]
	UnknownType(String),

	/// Registering a configured entry failed.
	#[error(transparent)]
	Remoting(#[from] RemotingError),
}

/// Static settings for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemotingConfig {
	/// Optional URI prefix stripped when normalizing object URIs.
	pub application_name: Option<String>,
	/// Identity insertions between weak-entry sweeps.
	pub sweep_interval: usize,
	/// Replace fault details with a generic internal error for calls that
	/// arrive from another domain.
	pub custom_errors: bool,
	/// Statically registered server objects.
	pub well_known: Vec<WellKnownConfig>,
}

impl Default for RemotingConfig {
	fn default() -> Self {
		Self {
			application_name: None,
			sweep_interval: DEFAULT_SWEEP_INTERVAL,
			custom_errors: false,
			well_known: Vec::new(),
		}
	}
}

/// One `[[well_known]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WellKnownConfig {
	pub uri: String,
	pub type_name: String,
	#[serde(default)]
	pub mode: WellKnownMode,
}

impl RemotingConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads and parses a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&input)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.sweep_interval == 0 {
			return Err(ConfigError::InvalidValue {
				field: "sweep_interval",
				reason: "must be at least 1".into(),
			});
		}
		if let Some(entry) = self.well_known.iter().find(|e| e.uri.is_empty()) {
			return Err(ConfigError::InvalidValue {
				field: "well_known.uri",
				reason: format!("empty uri for type `{}`", entry.type_name),
			});
		}
		Ok(())
	}
}

/// Factories for server types named in configuration.
#[derive(Default, Clone)]
pub struct TypeCatalog {
	factories: FxHashMap<String, ObjectFactory>,
}

impl TypeCatalog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, type_name: impl Into<String>, factory: ObjectFactory) {
		self.factories.insert(type_name.into(), factory);
	}

	pub fn get(&self, type_name: &str) -> Option<ObjectFactory> {
		self.factories.get(type_name).cloned()
	}
}
