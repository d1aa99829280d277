use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use http::HeaderValue;
use lc_diary_auth::SigningSecret;
use time::Duration;

#[derive(Debug, Parser)]
#[command(name = "lc-diary-service")]
#[command(about = "HTTP service for the LC Diary problem tracker")]
pub struct Args {
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:4000")]
    pub bind: SocketAddr,
    /// Overrides only the port of `--bind`.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
    #[arg(long, env = "DIARY_DB", default_value = "./lc_diary.sqlite3")]
    pub db: PathBuf,
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,
    #[arg(long, env = "TOKEN_TTL_HOURS", default_value_t = 72)]
    pub token_ttl_hours: u32,
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',', default_value = "http://localhost:5173")]
    pub allowed_origins: Vec<String>,
}

/// Process configuration, validated once at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind: SocketAddr,
    pub db: PathBuf,
    pub secret: SigningSecret,
    pub token_ttl: Duration,
    pub allowed_origins: Vec<HeaderValue>,
}

impl ServiceConfig {
    /// # Errors
    /// Returns an error when the signing secret is missing or weak, the token
    /// lifetime is zero, or an origin is not a valid header value.
    pub fn from_args(args: Args) -> Result<Self> {
        let Some(raw_secret) = args.jwt_secret else {
            bail!("JWT_SECRET is required");
        };
        let secret = SigningSecret::new(raw_secret).map_err(|err| anyhow!("JWT_SECRET rejected: {err}"))?;

        if args.token_ttl_hours == 0 {
            bail!("TOKEN_TTL_HOURS must be greater than zero");
        }

        let allowed_origins = args
            .allowed_origins
            .iter()
            .map(|origin| origin.trim())
            .filter(|origin| !origin.is_empty())
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .with_context(|| format!("invalid CORS origin: {origin}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut bind = args.bind;
        if let Some(port) = args.port {
            bind.set_port(port);
        }

        Ok(Self {
            bind,
            db: args.db,
            secret,
            token_ttl: Duration::hours(i64::from(args.token_ttl_hours)),
            allowed_origins,
        })
    }
}
