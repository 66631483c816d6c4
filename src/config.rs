//! Proxy definitions loaded from a TOML file. Format-agnostic via serde;
//! only the TOML entry points are wired up.
//!
//! ```toml
//! strict = true
//!
//! [[proxies]]
//! name = "redis"
//! listen = "127.0.0.1:26379"
//! upstream = "127.0.0.1:6379"
//! ```

use serde::Deserialize;

use crate::Proxy;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Reject unknown fields in toxic JSON payloads.
    #[serde(default)]
    pub strict: bool,

    #[serde(default)]
    pub proxies: Vec<ProxyDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct ProxyDefinition {
    pub name: String,
    pub listen: String,
    pub upstream: String,
}

impl Config {
    /// Parse config from a TOML string.
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load config from a TOML file.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Build (unstarted) proxies from the definitions.
    pub fn build_proxies(self) -> Vec<Proxy> {
        let strict = self.strict;
        self.proxies
            .into_iter()
            .map(|def| {
                let mut builder = Proxy::builder()
                    .name(def.name)
                    .listen(def.listen)
                    .upstream(def.upstream);
                if strict {
                    builder = builder.strict();
                }
                builder.build()
            })
            .collect()
    }
}
