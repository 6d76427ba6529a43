//! Query extractor for the Pi-hole `getallqueries` command
//!
//! Requests the recent query log over an open session and keeps records whose
//! domain matches a keyword and whose timestamp falls in the trailing window.
//! - One malformed line is skipped, the rest of the batch is kept
//! - A missing end-of-message marker means the session is broken

use chrono::{DateTime, Duration as TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::monitoring::connection::Session;
use crate::utils::error::{ExtractError, MalformedRecord};

/// Terminator line sent after the last record
pub const END_OF_MESSAGE: &str = "---EOM---";

/// Default number of historical entries requested per poll
pub const DEFAULT_QUERY_LIMIT: u32 = 5000;

/// Default time allowed for the whole response to arrive
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Length of the trailing filter window
pub const WINDOW_MINUTES: i64 = 5;

/// One parsed line of the query log
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord {
    pub timestamp: DateTime<Tz>,
    pub query_type: String,
    pub domain: String,
    pub client: String,
    /// Raw status token as sent by the appliance
    pub status: String,
}

impl QueryRecord {
    /// Parse a whitespace-separated response line
    ///
    /// Fields past the fifth are ignored.
    pub fn parse(line: &str, timezone: Tz) -> Result<Self, MalformedRecord> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            return Err(MalformedRecord::MissingFields {
                found: fields.len(),
            });
        }

        let invalid = || MalformedRecord::InvalidTimestamp {
            value: fields[0].to_string(),
        };
        let epoch: i64 = fields[0].parse().map_err(|_| invalid())?;
        let timestamp = timezone.timestamp_opt(epoch, 0).single().ok_or_else(invalid)?;

        Ok(Self {
            timestamp,
            query_type: fields[1].to_string(),
            domain: fields[2].to_string(),
            client: fields[3].to_string(),
            status: fields[4].to_string(),
        })
    }
}

/// Lowercased keywords matched as substrings of the queried domain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordSet {
    keywords: Vec<String>,
}

impl KeywordSet {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// Parse a comma-separated list, dropping blank entries
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.keywords
    }

    /// True if any keyword occurs in `domain`, ignoring case
    pub fn matches(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        self.keywords.iter().any(|k| domain.contains(k.as_str()))
    }
}

/// Trailing time window anchored at `now`
///
/// The lower bound is open: a record exactly `WINDOW_MINUTES` old is outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterWindow {
    start: DateTime<Utc>,
}

impl FilterWindow {
    pub fn trailing(now: DateTime<Utc>) -> Self {
        Self {
            start: now - TimeDelta::minutes(WINDOW_MINUTES),
        }
    }

    /// Exclusive lower bound
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn contains<T: TimeZone>(&self, timestamp: &DateTime<T>) -> bool {
        timestamp.with_timezone(&Utc) > self.start
    }
}

/// Issues `getallqueries` and filters the response
#[derive(Debug, Clone)]
pub struct QueryExtractor {
    query_limit: u32,
    read_timeout: Duration,
    timezone: Tz,
}

impl QueryExtractor {
    pub fn new(query_limit: u32, read_timeout: Duration, timezone: Tz) -> Self {
        Self {
            query_limit,
            read_timeout,
            timezone,
        }
    }

    /// Request line for the bulk query
    pub fn request(&self) -> String {
        format!(">getallqueries ({})\n", self.query_limit)
    }

    /// Fetch the query log and return matching records in response order
    ///
    /// Returns `Err` only when the session itself failed: a write error, EOF
    /// or no end-of-message marker within the read timeout. Undecodable
    /// responses and malformed lines yield fewer (possibly zero) records.
    #[instrument(
        skip(self, session, keywords, window),
        fields(peer = %session.peer(), since = %window.start())
    )]
    pub async fn extract(
        &self,
        session: &mut dyn Session,
        keywords: &KeywordSet,
        window: &FilterWindow,
    ) -> Result<Vec<QueryRecord>, ExtractError> {
        session.send(&self.request()).await?;

        let raw = tokio::time::timeout(self.read_timeout, session.read_until_marker(END_OF_MESSAGE))
            .await
            .map_err(|_| ExtractError::ReadTimeout(self.read_timeout))??;

        let response = match String::from_utf8(raw) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Error getting queries: response is not valid UTF-8");
                return Ok(Vec::new());
            }
        };

        let records = self.filter_response(&response, keywords, window);
        info!(matched = records.len(), "Filtered Pi-hole queries");
        Ok(records)
    }

    /// Parse and filter a complete response body
    pub fn filter_response(
        &self,
        response: &str,
        keywords: &KeywordSet,
        window: &FilterWindow,
    ) -> Vec<QueryRecord> {
        let mut skipped = 0usize;
        let mut total = 0usize;

        let records: Vec<QueryRecord> = response
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && *line != END_OF_MESSAGE)
            .filter_map(|line| {
                total += 1;
                match QueryRecord::parse(line, self.timezone) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        skipped += 1;
                        debug!(error = %e, line = %line, "Skipping malformed query line");
                        None
                    }
                }
            })
            .filter(|record| keywords.matches(&record.domain) && window.contains(&record.timestamp))
            .collect();

        if skipped > 0 {
            warn!(skipped, total, "Skipped malformed query lines");
        }

        records
    }
}

impl Default for QueryExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_LIMIT, DEFAULT_READ_TIMEOUT, chrono_tz::Asia::Singapore)
    }
}
