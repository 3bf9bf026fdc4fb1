use crate::error::{ParseNumberSnafu, RegistrarResult};
use secrecy::{ExposeSecret, SecretString};
use snafu::ResultExt;
use std::{net::SocketAddr, path::PathBuf, str::FromStr, sync::Arc};

const DEFAULT_DATABASE_URL: &str = "postgres://localhost:5432/registrar";
const DEFAULT_MAX_CONNECTIONS: u32 = 15;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_ENVIRONMENT: &str = "development";
const DEFAULT_FRONTEND_DIR: &str = "frontend/dist";
pub const MEMORY_DATABASE_URL: &str = "memory://";

#[derive(Clone, Debug)]
pub struct RuntimeConfiguration {
    db_config: Arc<DbConfig>,
    server_config: Arc<ServerConfig>,
}

impl RuntimeConfiguration {
    pub fn new() -> RegistrarResult<Self> {
        Self::from_lookup(|name| dotenvy::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> RegistrarResult<Self> {
        Ok(Self {
            db_config: Arc::new(DbConfig::from_lookup(&lookup)?),
            server_config: Arc::new(ServerConfig::from_lookup(&lookup)?),
        })
    }

    pub fn db_config(&self) -> Arc<DbConfig> {
        self.db_config.clone()
    }

    pub fn server_config(&self) -> Arc<ServerConfig> {
        self.server_config.clone()
    }
}

fn parse_or<T: FromStr<Err = std::num::ParseIntError>>(
    lookup: &impl Fn(&'static str) -> Option<String>,
    name: &'static str,
    default: T,
) -> RegistrarResult<T> {
    match lookup(name) {
        Some(original) => original
            .trim()
            .parse()
            .context(ParseNumberSnafu { name, original }),
        None => Ok(default),
    }
}

#[derive(Debug)]
pub struct DbConfig {
    url: SecretString,
    max_connections: u32,
}

impl DbConfig {
    fn from_lookup(lookup: &impl Fn(&'static str) -> Option<String>) -> RegistrarResult<Self> {
        Ok(Self {
            url: SecretString::from(
                lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            ),
            max_connections: parse_or(lookup, "DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
        })
    }

    pub fn get_db_path(&self) -> &str {
        self.url.expose_secret()
    }

    pub fn is_in_memory(&self) -> bool {
        self.get_db_path() == MEMORY_DATABASE_URL
    }

    pub const fn max_connections(&self) -> u32 {
        self.max_connections
    }
}

#[derive(Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub frontend_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
}

impl ServerConfig {
    fn from_lookup(lookup: &impl Fn(&'static str) -> Option<String>) -> RegistrarResult<Self> {
        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(lookup, "PORT", DEFAULT_PORT)?,
            environment: lookup("APP_ENV").unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
            frontend_dir: lookup("FRONTEND_DIR")
                .map_or_else(|| PathBuf::from(DEFAULT_FRONTEND_DIR), PathBuf::from),
            log_dir: lookup("LOG_DIR")
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
        })
    }

    pub fn bind_address(&self) -> String {
        // bare ipv6 hosts need brackets
        match self.host.parse::<std::net::IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.port).to_string(),
            Err(_) => format!("{}:{}", self.host, self.port),
        }
    }
}
