use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::FixedOffset;
use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

use crate::clock::parse_offset;

pub const DEFAULT_UTC_OFFSET: &str = "-03:00";

/// Server settings, read from `LABDESK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// Offset of the business timezone every reservation is interpreted in.
    pub utc_offset: FixedOffset,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidUtcOffset(String),
    /// Only one of `LABDESK_TLS_CERT` / `LABDESK_TLS_KEY` is set.
    IncompleteTls,
    Tls(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidUtcOffset(s) => {
                write!(f, "LABDESK_UTC_OFFSET: expected +HH:MM or -HH:MM, got {s:?}")
            }
            ConfigError::IncompleteTls => write!(
                f,
                "both LABDESK_TLS_CERT and LABDESK_TLS_KEY must be set, or neither"
            ),
            ConfigError::Tls(e) => write!(f, "TLS setup failed: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parsed<T: std::str::FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|s| s.trim().parse().ok())
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("loaded {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparsable numbers fall back to their defaults; a bad offset does not,
    /// since guessing the timezone would shift every reservation.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let offset_raw = get("LABDESK_UTC_OFFSET").unwrap_or_else(|| DEFAULT_UTC_OFFSET.into());
        let utc_offset =
            parse_offset(&offset_raw).ok_or(ConfigError::InvalidUtcOffset(offset_raw))?;

        Ok(Self {
            port: parsed(get("LABDESK_PORT")).unwrap_or(5433),
            bind: get("LABDESK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: get("LABDESK_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            password: get("LABDESK_PASSWORD").unwrap_or_else(|| "labdesk".into()),
            max_connections: parsed(get("LABDESK_MAX_CONNECTIONS")).unwrap_or(256),
            compact_threshold: parsed(get("LABDESK_COMPACT_THRESHOLD")).unwrap_or(1000),
            metrics_port: parsed(get("LABDESK_METRICS_PORT")),
            utc_offset,
            tls_cert: get("LABDESK_TLS_CERT"),
            tls_key: get("LABDESK_TLS_KEY"),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Acceptor for the configured PEM pair, `None` for plain TCP.
    pub fn tls_acceptor(&self) -> Result<Option<TlsAcceptor>, ConfigError> {
        let (cert_path, key_path) = match (&self.tls_cert, &self.tls_key) {
            (None, None) => return Ok(None),
            (Some(c), Some(k)) => (c, k),
            _ => return Err(ConfigError::IncompleteTls),
        };
        let tls_err = |e: &dyn std::fmt::Display| ConfigError::Tls(e.to_string());

        let cert_file = File::open(cert_path).map_err(|e| tls_err(&format!("{cert_path}: {e}")))?;
        let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
            .collect::<Result<_, _>>()
            .map_err(|e| tls_err(&e))?;

        let key_file = File::open(key_path).map_err(|e| tls_err(&format!("{key_path}: {e}")))?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
            .map_err(|e| tls_err(&e))?
            .ok_or_else(|| tls_err(&format!("{key_path}: no private key found")))?;

        let mut server = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| tls_err(&e))?;
        server.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(Some(TlsAcceptor::from(Arc::new(server))))
    }
}
