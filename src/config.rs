//! Process configuration resolved from the environment.
//!
//! Every setting is checked before any error is reported, so a single run
//! shows the operator all of the problems at once.

use std::{fmt, num::ParseIntError};

use forward_core::upstream::{Upstream, UpstreamError};

pub const PORTAL_ENDPOINT_VAR: &str = "THREESCALE_PORTAL_ENDPOINT";
pub const BACKEND_ENDPOINT_VAR: &str = "BACKEND_ENDPOINT_OVERRIDE";
pub const PORTAL_PORT_VAR: &str = "PORTAL_LISTEN_PORT";
pub const BACKEND_PORT_VAR: &str = "BACKEND_LISTEN_PORT";

pub const DEFAULT_PORTAL_PORT: u16 = 9090;
pub const DEFAULT_BACKEND_PORT: u16 = 9091;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no {0} environment variable found")]
    MissingEndpoint(&'static str),
    #[error("cannot parse the {var} environment variable ({value}): {source}")]
    InvalidEndpoint {
        var: &'static str,
        value: String,
        #[source]
        source: UpstreamError,
    },
    #[error("cannot parse the {var} environment variable ({value}): {source}")]
    InvalidPort {
        var: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

/// Every problem found while resolving the configuration, in check order,
/// along with the ports that were defaulted before the failure.
#[derive(Debug, thiserror::Error)]
#[error("{}", join_lines(.errors))]
pub struct ConfigErrors {
    pub errors: Vec<ConfigError>,
    pub warnings: Vec<ConfigWarning>,
}

fn join_lines(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl ConfigErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ConfigError> {
        self.errors.iter()
    }
}

/// A listen port that fell back to its default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigWarning {
    pub var: &'static str,
    pub default: u16,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no {} environment variable found, defaulting to '{}'",
            self.var, self.default
        )
    }
}

/// One proxied target: where to listen and where to forward.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub name: &'static str,
    pub upstream: Upstream,
    pub listen_port: u16,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub portal: TargetConfig,
    pub backend: TargetConfig,
}

impl Config {
    /// Resolves the configuration from the process environment.
    pub fn from_env() -> Result<(Self, Vec<ConfigWarning>), ConfigErrors> {
        Self::resolve(|var| std::env::var(var).ok())
    }

    /// Resolves the configuration through `lookup`.
    ///
    /// Empty values count as unset. The defaulted ports are returned
    /// alongside the configuration, or alongside the errors.
    pub fn resolve<F>(lookup: F) -> Result<(Self, Vec<ConfigWarning>), ConfigErrors>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut resolver = Resolver {
            lookup,
            errors: Vec::new(),
            warnings: Vec::new(),
        };

        let portal = resolver.endpoint(PORTAL_ENDPOINT_VAR);
        let backend = resolver.endpoint(BACKEND_ENDPOINT_VAR);
        let portal_port = resolver.port(PORTAL_PORT_VAR, DEFAULT_PORTAL_PORT);
        let backend_port = resolver.port(BACKEND_PORT_VAR, DEFAULT_BACKEND_PORT);

        match (portal, backend, portal_port, backend_port) {
            (Some(portal), Some(backend), Some(portal_port), Some(backend_port)) => {
                let config = Self {
                    portal: TargetConfig {
                        name: "portal",
                        upstream: portal,
                        listen_port: portal_port,
                    },
                    backend: TargetConfig {
                        name: "backend",
                        upstream: backend,
                        listen_port: backend_port,
                    },
                };
                Ok((config, resolver.warnings))
            }
            _ => Err(ConfigErrors {
                errors: resolver.errors,
                warnings: resolver.warnings,
            }),
        }
    }

    /// Targets in start order.
    pub fn targets(&self) -> [&TargetConfig; 2] {
        [&self.backend, &self.portal]
    }
}

struct Resolver<F> {
    lookup: F,
    errors: Vec<ConfigError>,
    warnings: Vec<ConfigWarning>,
}

impl<F> Resolver<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var).filter(|value| !value.is_empty())
    }

    fn endpoint(&mut self, var: &'static str) -> Option<Upstream> {
        let Some(value) = self.get(var) else {
            self.errors.push(ConfigError::MissingEndpoint(var));
            return None;
        };

        match Upstream::parse(&value) {
            Ok(upstream) => Some(upstream),
            Err(source) => {
                self.errors.push(ConfigError::InvalidEndpoint { var, value, source });
                None
            }
        }
    }

    fn port(&mut self, var: &'static str, default: u16) -> Option<u16> {
        let Some(value) = self.get(var) else {
            self.warnings.push(ConfigWarning { var, default });
            return Some(default);
        };

        match value.parse::<u16>() {
            Ok(port) => Some(port),
            Err(source) => {
                self.errors.push(ConfigError::InvalidPort { var, value, source });
                None
            }
        }
    }
}
