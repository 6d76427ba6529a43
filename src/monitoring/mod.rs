//! Monitoring pipeline for the Pi-hole query log
//!
//! - Connection management for the telnet API
//! - Query extraction and filtering
//! - Digest formatting and Telegram delivery
//! - The supervising poll loop

pub mod connection;
pub mod digest;
pub mod query;
pub mod supervisor;
pub mod telegram_alert;

pub use connection::{ConnectionManager, Connector, RetryPolicy, Session, TcpConnector};
pub use digest::format_digest;
pub use query::{FilterWindow, KeywordSet, QueryExtractor, QueryRecord};
pub use supervisor::{ApplianceAddress, PollSupervisor, PollTimings, SessionOutcome, SupervisorState};
pub use telegram_alert::{Notifier, SharedNotifier, TelegramNotifier};
