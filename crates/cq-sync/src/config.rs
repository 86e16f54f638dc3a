use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use cq_adapters::DEFAULT_BASE_URL;
use cq_storage::{HttpClientConfig, RetryPolicy, StoreConfig, TRANSIENT_OVERLOAD_STATUS};
use thiserror::Error;

use crate::cursor::PagePolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {key}")]
    Missing { key: &'static str },
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone)]
pub struct SyncConfig {
    pub api_key: String,
    pub base_url: String,
    pub database_url: String,
    pub database_password: String,
    pub member_page_limit: usize,
    pub legislation_page_limit: usize,
    /// Pages shorter than `limit - page_tolerance` end the walk.
    pub page_tolerance: usize,
    pub max_pages: Option<usize>,
    pub max_concurrent_requests: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub retry_statuses: Vec<u16>,
    pub http_timeout: Duration,
    pub user_agent: Option<String>,
    pub current_members_only: bool,
    pub legislation_details: bool,
    pub member_batch_size: usize,
    pub db_max_connections: u32,
    pub db_connect_deadline: Duration,
    pub migrations_dir: PathBuf,
    pub reports_dir: Option<PathBuf>,
    pub scheduler_enabled: bool,
    pub sync_cron_members: String,
    pub sync_cron_legislation: String,
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("database_url", &self.database_url)
            .field("database_password", &"<redacted>")
            .field("member_page_limit", &self.member_page_limit)
            .field("legislation_page_limit", &self.legislation_page_limit)
            .field("page_tolerance", &self.page_tolerance)
            .field("max_pages", &self.max_pages)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("retry_statuses", &self.retry_statuses)
            .field("http_timeout", &self.http_timeout)
            .field("current_members_only", &self.current_members_only)
            .field("legislation_details", &self.legislation_details)
            .field("member_batch_size", &self.member_batch_size)
            .field("reports_dir", &self.reports_dir)
            .field("scheduler_enabled", &self.scheduler_enabled)
            .finish_non_exhaustive()
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing { key });

        let config = Self {
            api_key: required("CONGRESS_API_KEY")?,
            base_url: get("CONGRESS_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            database_url: required("DATABASE_URL")?,
            database_password: required("DATABASE_PASSWORD")?,
            member_page_limit: parsed(&get, "CQ_MEMBER_PAGE_LIMIT", 250)?,
            legislation_page_limit: parsed(&get, "CQ_LEGISLATION_PAGE_LIMIT", 250)?,
            page_tolerance: parsed(&get, "CQ_PAGE_TOLERANCE", 1)?,
            max_pages: match parsed(&get, "CQ_MAX_PAGES", 200usize)? {
                0 => None,
                n => Some(n),
            },
            max_concurrent_requests: parsed(&get, "CQ_MAX_CONCURRENT_REQUESTS", 5)?,
            max_retries: parsed(&get, "CQ_MAX_RETRIES", 3)?,
            retry_delay: Duration::from_millis(parsed(&get, "CQ_RETRY_DELAY_MS", 500)?),
            retry_statuses: status_list(&get, "CQ_RETRY_STATUSES")?,
            http_timeout: Duration::from_secs(parsed(&get, "CQ_HTTP_TIMEOUT_SECS", 30)?),
            user_agent: get("CQ_USER_AGENT"),
            current_members_only: flag(&get, "CQ_CURRENT_MEMBERS_ONLY", true)?,
            legislation_details: flag(&get, "CQ_LEGISLATION_DETAILS", false)?,
            member_batch_size: parsed(&get, "CQ_MEMBER_BATCH_SIZE", 25)?,
            db_max_connections: parsed(&get, "CQ_DB_MAX_CONNECTIONS", 5)?,
            db_connect_deadline: Duration::from_secs(60),
            migrations_dir: get("CQ_MIGRATIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./migrations")),
            reports_dir: get("CQ_REPORTS_DIR").map(PathBuf::from),
            scheduler_enabled: flag(&get, "CQ_SCHEDULER_ENABLED", false)?,
            sync_cron_members: get("SYNC_CRON_MEMBERS").unwrap_or_else(|| "0 0 6 * * *".to_string()),
            sync_cron_legislation: get("SYNC_CRON_LEGISLATION")
                .unwrap_or_else(|| "0 30 6 * * *".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("CQ_MEMBER_PAGE_LIMIT", self.member_page_limit),
            ("CQ_LEGISLATION_PAGE_LIMIT", self.legislation_page_limit),
            ("CQ_MAX_CONCURRENT_REQUESTS", self.max_concurrent_requests),
            ("CQ_MEMBER_BATCH_SIZE", self.member_batch_size),
            ("CQ_DB_MAX_CONNECTIONS", self.db_max_connections as usize),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: value.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.http_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "CQ_HTTP_TIMEOUT_SECS",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.http_timeout,
            user_agent: self.user_agent.clone(),
            concurrency: self.max_concurrent_requests,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: self.retry_delay,
                retry_statuses: self.retry_statuses.clone(),
            },
            api_key: self.api_key.clone(),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            url: self.database_url.clone(),
            password: self.database_password.clone(),
            max_connections: self.db_max_connections,
            connect_deadline: self.db_connect_deadline,
        }
    }

    pub fn page_policy(&self, limit: usize) -> PagePolicy {
        PagePolicy {
            limit,
            tolerance: self.page_tolerance,
            max_pages: self.max_pages,
        }
    }
}

fn parsed<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn flag<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn status_list<G>(get: &G, key: &'static str) -> Result<Vec<u16>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(vec![TRANSIENT_OVERLOAD_STATUS]);
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u16>()
                .ok()
                .filter(|code| (100..=599).contains(code))
                .ok_or_else(|| ConfigError::Invalid {
                    key,
                    value: raw.clone(),
                    reason: format!("{s} is not an HTTP status code"),
                })
        })
        .collect()
}
