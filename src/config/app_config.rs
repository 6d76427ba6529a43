use std::env;
use std::time::Duration;

use chrono_tz::Tz;

use crate::monitoring::connection::RetryPolicy;
use crate::monitoring::query::KeywordSet;
use crate::monitoring::supervisor::PollTimings;
use crate::monitoring::telegram_alert::DEFAULT_DELIVERY_TIMEOUT;

const DEFAULT_PIHOLE_HOST: &str = "localhost";
const DEFAULT_PIHOLE_PORT: u16 = 4711;
const DEFAULT_KEYWORDS: &str = "instagram";
const DEFAULT_TIMEZONE: &str = "Asia/Singapore";
const DEFAULT_QUERY_LIMIT: u32 = 5000;
const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// 애플리케이션 설정
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pihole_host: String,
    pub pihole_port: u16,
    pub keywords: KeywordSet,
    pub timezone: Tz,
    pub query_limit: u32,

    // Telegram
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
    pub telegram_api_base: String,
    pub telegram_timeout: Duration,

    // Timers
    pub poll_interval: Duration,
    pub reconnect_cooldown: Duration,
    pub connect_max_attempts: u32,
    pub connect_retry_delay: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl AppConfig {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 주어진 조회 함수로 설정 로드
    ///
    /// Unset and blank values fall back to defaults. Telegram credentials have
    /// no default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let pihole_host = get("PIHOLE_HOST").unwrap_or_else(|| DEFAULT_PIHOLE_HOST.to_string());
        let pihole_port = parse_or("PIHOLE_PORT", get("PIHOLE_PORT"), DEFAULT_PIHOLE_PORT)?;

        let keywords = KeywordSet::parse(
            get("PIHOLE_KEYWORDS")
                .as_deref()
                .unwrap_or(DEFAULT_KEYWORDS),
        );
        if keywords.is_empty() {
            tracing::warn!("PIHOLE_KEYWORDS has no usable keywords, nothing will ever match");
        }

        let timezone_name = get("PIHOLE_TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone = timezone_name
            .trim()
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(timezone_name.clone()))?;

        let query_limit = parse_or(
            "PIHOLE_QUERY_LIMIT",
            get("PIHOLE_QUERY_LIMIT"),
            DEFAULT_QUERY_LIMIT,
        )?;

        let telegram_bot_token =
            get("TELEGRAM_BOT_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;
        let telegram_chat_id =
            get("TELEGRAM_CHAT_ID").ok_or(ConfigError::Missing("TELEGRAM_CHAT_ID"))?;
        let telegram_api_base = get("TELEGRAM_API_BASE")
            .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let telegram_timeout = secs_or(
            "TELEGRAM_TIMEOUT_SECS",
            get("TELEGRAM_TIMEOUT_SECS"),
            DEFAULT_DELIVERY_TIMEOUT,
        )?;
        if telegram_timeout.is_zero() {
            return Err(ConfigError::InvalidNumber {
                key: "TELEGRAM_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }

        let defaults = PollTimings::default();
        let retry = RetryPolicy::default();

        let poll_interval = secs_or(
            "POLL_INTERVAL_SECS",
            get("POLL_INTERVAL_SECS"),
            defaults.poll_interval,
        )?;
        let reconnect_cooldown = secs_or(
            "RECONNECT_COOLDOWN_SECS",
            get("RECONNECT_COOLDOWN_SECS"),
            defaults.cooldown,
        )?;
        let connect_max_attempts = parse_or(
            "CONNECT_MAX_ATTEMPTS",
            get("CONNECT_MAX_ATTEMPTS"),
            retry.max_attempts,
        )?;
        if connect_max_attempts == 0 {
            return Err(ConfigError::InvalidNumber {
                key: "CONNECT_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }
        let connect_retry_delay = secs_or(
            "CONNECT_RETRY_DELAY_SECS",
            get("CONNECT_RETRY_DELAY_SECS"),
            retry.retry_delay,
        )?;
        let connect_timeout = secs_or(
            "CONNECT_TIMEOUT_SECS",
            get("CONNECT_TIMEOUT_SECS"),
            retry.attempt_timeout,
        )?;
        let read_timeout = secs_or(
            "READ_TIMEOUT_SECS",
            get("READ_TIMEOUT_SECS"),
            crate::monitoring::query::DEFAULT_READ_TIMEOUT,
        )?;

        Ok(Self {
            pihole_host,
            pihole_port,
            keywords,
            timezone,
            query_limit,
            telegram_bot_token,
            telegram_chat_id,
            telegram_api_base,
            telegram_timeout,
            poll_interval,
            reconnect_cooldown,
            connect_max_attempts,
            connect_retry_delay,
            connect_timeout,
            read_timeout,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.connect_max_attempts,
            retry_delay: self.connect_retry_delay,
            attempt_timeout: self.connect_timeout,
        }
    }

    pub fn poll_timings(&self) -> PollTimings {
        PollTimings {
            poll_interval: self.poll_interval,
            cooldown: self.reconnect_cooldown,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
            key,
            value: raw,
        }),
        None => Ok(default),
    }
}

fn secs_or(
    key: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse_or(key, value, default.as_secs()).map(Duration::from_secs)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),
}
