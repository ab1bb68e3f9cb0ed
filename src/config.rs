use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Redis,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "redis" => Ok(StorageBackend::Redis),
            other => Err(format!("unknown storage backend {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage_backend: StorageBackend,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_username: Option<String>,
    pub redis_password: Option<String>,
    pub api_port: u16,
    pub api_bearer_token: Option<String>,
    pub ldap_port: u16,
    pub ldaps_port: u16,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub enable_tls: bool,
    pub seed_admin_password: String,
    /// Dump every LDAP packet at trace level.
    pub log_packets: bool,
    /// Variables that were set to unparseable values.
    #[serde(skip)]
    pub invalid_settings: Vec<String>,
}

/// Variable reader that remembers values which were set but did not parse.
struct Settings<F> {
    lookup: F,
    invalid: Vec<String>,
}

impl<F: Fn(&str) -> Option<String>> Settings<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn parsed<T>(&mut self, name: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(name) {
            Some(raw) => match raw.parse() {
                Ok(value) => value,
                Err(e) => {
                    self.invalid.push(format!("Invalid {}={:?}: {}", name, raw, e));
                    default
                }
            },
            None => default,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let mut settings = Settings {
            lookup,
            invalid: Vec::new(),
        };
        Self {
            storage_backend: settings.parsed("STORAGE_BACKEND", StorageBackend::Memory),
            redis_host: settings
                .string("REDIS_HOST")
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            redis_port: settings.parsed("REDIS_PORT", 6379),
            redis_username: settings.string("REDIS_USERNAME"),
            redis_password: settings.string("REDIS_PASSWORD"),
            api_port: settings.parsed("API_PORT", 8080),
            api_bearer_token: settings.string("API_BEARER_TOKEN").filter(|t| !t.is_empty()),
            ldap_port: settings.parsed("LDAP_PORT", 3389), // Non-privileged port
            ldaps_port: settings.parsed("LDAPS_PORT", 3636),
            tls_cert_path: settings.string("TLS_CERT_PATH"),
            tls_key_path: settings.string("TLS_KEY_PATH"),
            enable_tls: settings.parsed("ENABLE_TLS", false),
            seed_admin_password: settings
                .string("LDAP_SEED_ADMIN_PASSWORD")
                .unwrap_or_else(|| "admin".to_string()),
            log_packets: settings.parsed("LDAP_LOG_PACKETS", false),
            invalid_settings: settings.invalid,
        }
    }

    pub fn api_address(&self) -> String {
        format!("0.0.0.0:{}", self.api_port)
    }

    pub fn ldap_address(&self) -> String {
        format!("0.0.0.0:{}", self.ldap_port)
    }

    pub fn ldaps_address(&self) -> String {
        format!("0.0.0.0:{}", self.ldaps_port)
    }

    pub fn redis_url(&self) -> String {
        let mut url = "redis://".to_string();

        if let (Some(username), Some(password)) = (&self.redis_username, &self.redis_password) {
            url.push_str(&format!("{}:{}@", username, password));
        } else if let Some(username) = &self.redis_username {
            url.push_str(&format!("{}@", username));
        } else if let Some(password) = &self.redis_password {
            url.push_str(&format!(":{}@", password));
        }

        url.push_str(&format!("{}:{}", self.redis_host, self.redis_port));
        url
    }

    /// Validate configuration at startup
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(invalid) = self.invalid_settings.first() {
            anyhow::bail!("{}", invalid);
        }

        if self.storage_backend == StorageBackend::Redis && self.redis_port == 0 {
            anyhow::bail!("REDIS_PORT cannot be 0");
        }

        if self.api_port == 0 {
            anyhow::bail!("API_PORT cannot be 0");
        }

        if self.ldap_port == 0 {
            anyhow::bail!("LDAP_PORT cannot be 0");
        }

        if self.enable_tls {
            if self.ldaps_port == 0 {
                anyhow::bail!("LDAPS_PORT cannot be 0");
            }
            if self.ldaps_port == self.ldap_port {
                anyhow::bail!("LDAPS_PORT must differ from LDAP_PORT");
            }

            if let Some(cert_path) = &self.tls_cert_path {
                if !std::path::Path::new(cert_path).exists() {
                    anyhow::bail!("TLS certificate file not found: {}", cert_path);
                }
            } else {
                anyhow::bail!("ENABLE_TLS is true but TLS_CERT_PATH is not set");
            }

            if let Some(key_path) = &self.tls_key_path {
                if !std::path::Path::new(key_path).exists() {
                    anyhow::bail!("TLS key file not found: {}", key_path);
                }
            } else {
                anyhow::bail!("ENABLE_TLS is true but TLS_KEY_PATH is not set");
            }
        }

        if self.seed_admin_password.is_empty() {
            anyhow::bail!("LDAP_SEED_ADMIN_PASSWORD cannot be empty");
        }

        self.api_address()
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow::anyhow!("Invalid API_PORT {}: {}", self.api_port, e))?;

        self.ldap_address()
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow::anyhow!("Invalid LDAP_PORT {}: {}", self.ldap_port, e))?;

        Ok(())
    }
}
