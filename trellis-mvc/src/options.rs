//! Dispatcher options

use serde::{Deserialize, Serialize};
use trellis_config::{ConfigError, ConfigManager, Result as ConfigResult};
use trellis_core::{HttpMethod, HttpStatus};

/// Configuration key read by [`DispatchOptions::from_config`]
pub const CONFIG_KEY: &str = "dispatch";

/// Tunables for [`DispatchMiddleware`](crate::DispatchMiddleware).
///
/// ```toml
/// [dispatch]
/// fault_status = 500
/// form_methods = ["POST", "PUT", "PATCH"]
/// log_bindings = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchOptions {
    /// Status written for any fault inside the dispatch boundary
    pub fault_status: u16,
    /// Methods whose body may be read as a form
    pub form_methods: Vec<HttpMethod>,
    /// Log the source of every bound value at debug level
    pub log_bindings: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            fault_status: 500,
            form_methods: vec![HttpMethod::POST, HttpMethod::PUT, HttpMethod::PATCH],
            log_bindings: false,
        }
    }
}

impl DispatchOptions {
    /// Read the `dispatch` section, falling back to defaults when absent
    ///
    /// A `fault_status` outside 4xx/5xx is rejected.
    pub fn from_config(config: &ConfigManager) -> ConfigResult<Self> {
        if !config.has(CONFIG_KEY) {
            return Ok(Self::default());
        }
        let options: Self = config.get(CONFIG_KEY)?;
        if !HttpStatus::is_fault_code(options.fault_status) {
            return Err(ConfigError::invalid(
                format!("{}.fault_status", CONFIG_KEY),
                format!("{} is not a 4xx or 5xx status", options.fault_status),
            ));
        }
        Ok(options)
    }

    pub fn allows_form(&self, method: HttpMethod) -> bool {
        self.form_methods.contains(&method)
    }
}
