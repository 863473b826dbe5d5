use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::{env, net::SocketAddr, time::Duration};
use thiserror::Error;

use crate::services::expiry_scheduler::DEFAULT_SWEEP_INTERVAL;

const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_CLIENT_ADDR: &str = "http://127.0.0.1:8080/";
const DEFAULT_DATABASE_URL: &str = "sqlite://store.db";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_MAX_UPLOAD_SIZE: usize = 32 << 20;
const DEFAULT_LIFETIME: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("address `{0}` must be a host:port pair")]
    InvalidAddr(String),
    #[error("{field}: `{value}` is not a valid duration (e.g. 90s, 15m, 1h30m, 2d)")]
    InvalidDuration { field: &'static str, value: String },
    #[error("{field}: `{value}` is not a valid number")]
    InvalidNumber { field: &'static str, value: String },
    #[error("{0} is set but is not valid unicode")]
    NotUnicode(&'static str),
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Share files behind short URLs that expire")]
pub struct Cli {
    /// `serve`: host:port to bind. `upload`: server base URL (overrides FLING_ADDR)
    #[arg(long, global = true)]
    pub addr: Option<String>,

    /// Shared secret required to upload (overrides FLING_TOKEN)
    #[arg(long, global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server and the expiry sweeper
    Serve(ServeArgs),
    /// Upload a file and print its URL
    Upload(UploadArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// SQLite catalog URL (overrides FLING_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory where uploaded files are stored (overrides FLING_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<String>,

    /// Maximum upload size in bytes (overrides FLING_MAX_UPLOAD_SIZE)
    #[arg(long)]
    pub max_upload_size: Option<usize>,

    /// Time between expiry sweeps (overrides FLING_SWEEP_INTERVAL)
    #[arg(long)]
    pub sweep_interval: Option<String>,

    /// Lifetime used when an upload names none (overrides FLING_DEFAULT_LIFETIME)
    #[arg(long)]
    pub default_lifetime: Option<String>,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// How long to keep the file (e.g. 90s, 15m, 1h30m, 2d)
    #[arg(short = 'd', long, default_value = "1h", value_parser = upload_duration)]
    pub duration: String,

    /// File to upload, or `-` for stdin
    pub file: String,
}

/// Settings for `serve`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub token: String,
    pub database_url: String,
    pub upload_dir: String,
    pub max_upload_size: usize,
    pub sweep_interval: Duration,
    pub default_lifetime: Duration,
}

/// Settings for `upload`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub addr: String,
    pub token: String,
}

impl ServerConfig {
    /// Merge CLI args over environment variables over defaults.
    pub fn from_env_and_args(
        addr: Option<String>,
        token: Option<String>,
        args: ServeArgs,
    ) -> Result<Self> {
        Self::resolve(addr, token, args, |var| env::var(var))
    }

    fn resolve<F>(
        addr: Option<String>,
        token: Option<String>,
        args: ServeArgs,
        lookup: F,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let env_opt = |var: &'static str| -> Result<Option<String>, ConfigError> {
            match lookup(var) {
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode(var)),
            }
        };
        let env_or = |var: &'static str, default: &str| -> Result<String, ConfigError> {
            Ok(env_opt(var)?.unwrap_or_else(|| default.to_string()))
        };

        let addr = match addr {
            Some(addr) => addr,
            None => env_or("FLING_ADDR", DEFAULT_SERVER_ADDR)?,
        };
        validate_addr(&addr)?;

        let max_upload_size = match args.max_upload_size {
            Some(size) => size,
            None => {
                let raw = env_or("FLING_MAX_UPLOAD_SIZE", &DEFAULT_MAX_UPLOAD_SIZE.to_string())?;
                raw.trim()
                    .parse::<usize>()
                    .map_err(|_| ConfigError::InvalidNumber {
                        field: "FLING_MAX_UPLOAD_SIZE",
                        value: raw.clone(),
                    })?
            }
        };

        let sweep_interval = match args.sweep_interval {
            Some(raw) => positive_duration("--sweep-interval", &raw)?,
            None => match env_opt("FLING_SWEEP_INTERVAL")? {
                Some(raw) => positive_duration("FLING_SWEEP_INTERVAL", &raw)?,
                None => DEFAULT_SWEEP_INTERVAL,
            },
        };

        let default_lifetime = match args.default_lifetime {
            Some(raw) => positive_duration("--default-lifetime", &raw)?,
            None => match env_opt("FLING_DEFAULT_LIFETIME")? {
                Some(raw) => positive_duration("FLING_DEFAULT_LIFETIME", &raw)?,
                None => DEFAULT_LIFETIME,
            },
        };

        Ok(Self {
            addr,
            token: match token {
                Some(token) => token,
                None => env_or("FLING_TOKEN", "")?,
            },
            database_url: match args.database_url {
                Some(url) => url,
                None => env_or("FLING_DATABASE_URL", DEFAULT_DATABASE_URL)?,
            },
            upload_dir: match args.upload_dir {
                Some(dir) => dir,
                None => env_or("FLING_UPLOAD_DIR", DEFAULT_UPLOAD_DIR)?,
            },
            max_upload_size,
            sweep_interval,
            default_lifetime,
        })
    }
}

impl ClientConfig {
    pub fn from_env_and_args(addr: Option<String>, token: Option<String>) -> Self {
        Self {
            addr: addr
                .or_else(|| env::var("FLING_ADDR").ok())
                .unwrap_or_else(|| DEFAULT_CLIENT_ADDR.into()),
            token: token
                .or_else(|| env::var("FLING_TOKEN").ok())
                .unwrap_or_default(),
        }
    }
}

/// Require `host:port` with a numeric port. The host may be a name.
fn validate_addr(addr: &str) -> Result<(), ConfigError> {
    if addr.parse::<SocketAddr>().is_ok() {
        return Ok(());
    }
    match addr.rsplit_once(':') {
        Some((host, port))
            if !host.is_empty() && !host.contains(':') && port.parse::<u16>().is_ok() =>
        {
            Ok(())
        }
        _ => Err(ConfigError::InvalidAddr(addr.to_string())),
    }
}

fn positive_duration(field: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    parse_duration(raw)
        .filter(|d| !d.is_zero())
        .ok_or_else(|| ConfigError::InvalidDuration {
            field,
            value: raw.to_string(),
        })
}

/// Checks `upload -d` before anything is sent. The server would quietly
/// fall back to its default lifetime for a value it cannot use.
fn upload_duration(raw: &str) -> Result<String, ConfigError> {
    positive_duration("--duration", raw)?;
    Ok(raw.trim().to_string())
}

/// Parse `<int><unit>` segments, e.g. `90s`, `15m`, `1h30m`, `2d`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let mut rest = raw.trim();
    if rest.is_empty() {
        return None;
    }

    let mut total: u64 = 0;
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.bytes().take_while(u8::is_ascii_alphabetic).count();
        let scale = match &rest[..unit_len] {
            "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            "d" => 24 * 60 * 60,
            _ => return None,
        };
        rest = &rest[unit_len..];

        total = total.checked_add(value.checked_mul(scale)?)?;
    }
    Some(Duration::from_secs(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, env::VarError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| vars.get(var).cloned().ok_or(env::VarError::NotPresent)
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration(" 2d "), Some(Duration::from_secs(172_800)));
        assert_eq!(parse_duration("0s"), Some(Duration::ZERO));

        for bad in ["", "h", "10", "1x", "1h-5m", "-1h", "1.5h"] {
            assert_eq!(parse_duration(bad), None, "{bad:?}");
        }
    }

    #[test]
    fn test_validate_addr() {
        for good in ["127.0.0.1:8080", "[::1]:80", "localhost:3000", "0.0.0.0:0"] {
            assert!(validate_addr(good).is_ok(), "{good}");
        }
        for bad in ["", "8080", "localhost", ":8080", "host:port", "host:70000"] {
            assert!(validate_addr(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = ServerConfig::resolve(None, None, ServeArgs::default(), lookup(&[])).unwrap();
        assert_eq!(cfg.addr, DEFAULT_SERVER_ADDR);
        assert_eq!(cfg.token, "");
        assert_eq!(cfg.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(cfg.upload_dir, DEFAULT_UPLOAD_DIR);
        assert_eq!(cfg.max_upload_size, DEFAULT_MAX_UPLOAD_SIZE);
        assert_eq!(cfg.sweep_interval, DEFAULT_SWEEP_INTERVAL);
        assert_eq!(cfg.default_lifetime, DEFAULT_LIFETIME);
    }

    #[test]
    fn test_args_override_env() {
        let env = lookup(&[
            ("FLING_ADDR", "0.0.0.0:9000"),
            ("FLING_TOKEN", "from-env"),
            ("FLING_UPLOAD_DIR", "/srv/env"),
            ("FLING_SWEEP_INTERVAL", "5m"),
        ]);
        let args = ServeArgs {
            upload_dir: Some("/srv/cli".into()),
            ..ServeArgs::default()
        };

        let cfg = ServerConfig::resolve(None, Some("from-cli".into()), args, env).unwrap();
        assert_eq!(cfg.addr, "0.0.0.0:9000");
        assert_eq!(cfg.token, "from-cli");
        assert_eq!(cfg.upload_dir, "/srv/cli");
        assert_eq!(cfg.sweep_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let bad_addr =
            ServerConfig::resolve(Some("nope".into()), None, ServeArgs::default(), lookup(&[]));
        assert!(bad_addr.is_err());

        let bad_size = ServerConfig::resolve(
            None,
            None,
            ServeArgs::default(),
            lookup(&[("FLING_MAX_UPLOAD_SIZE", "lots")]),
        );
        assert!(bad_size.is_err());

        let zero_interval = ServerConfig::resolve(
            None,
            None,
            ServeArgs {
                sweep_interval: Some("0s".into()),
                ..ServeArgs::default()
            },
            lookup(&[]),
        );
        assert!(zero_interval.is_err());
    }

    #[test]
    fn test_non_unicode_env_is_an_error() {
        for var in ["FLING_SWEEP_INTERVAL", "FLING_DEFAULT_LIFETIME", "FLING_TOKEN"] {
            let lookup = move |name: &str| -> Result<String, env::VarError> {
                if name == var {
                    Err(env::VarError::NotUnicode("\u{fffd}".into()))
                } else {
                    Err(env::VarError::NotPresent)
                }
            };
            let err = ServerConfig::resolve(None, None, ServeArgs::default(), lookup).unwrap_err();
            match err.downcast_ref::<ConfigError>() {
                Some(ConfigError::NotUnicode(name)) => assert_eq!(*name, var),
                other => panic!("{var}: expected NotUnicode, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_upload_duration_is_checked_at_parse_time() {
        let cli = Cli::try_parse_from(["fling", "upload", "-d", "1h30m", "notes.txt"]).unwrap();
        match cli.command {
            Command::Upload(args) => {
                assert_eq!(args.duration, "1h30m");
                assert_eq!(args.file, "notes.txt");
            }
            other => panic!("expected upload, got {other:?}"),
        }

        let cli = Cli::try_parse_from(["fling", "upload", "notes.txt"]).unwrap();
        assert!(matches!(cli.command, Command::Upload(args) if args.duration == "1h"));

        for bad in ["30min", "0s", "soon", "-1h", ""] {
            let parsed = Cli::try_parse_from(["fling", "upload", "-d", bad, "notes.txt"]);
            assert!(parsed.is_err(), "{bad:?}");
        }
    }
}
