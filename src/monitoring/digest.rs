//! Digest formatting for matched queries

use crate::monitoring::query::{QueryRecord, WINDOW_MINUTES};

/// strftime pattern for record timestamps, zone abbreviation included
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

/// Render matched records as a chat message
///
/// One header line, a blank line, then one line per record in the given order.
pub fn format_digest(records: &[QueryRecord]) -> String {
    let mut digest = format!(
        "Recent Pi-hole Queries (last {} minutes):\n\n",
        WINDOW_MINUTES
    );

    for record in records {
        digest.push_str(&format_record(record));
        digest.push('\n');
    }

    digest
}

fn format_record(record: &QueryRecord) -> String {
    format!(
        "Time: {}, Domain: {}, Client: {}, Status: {}",
        record.timestamp.format(TIME_FORMAT),
        record.domain,
        record.client,
        record.status
    )
}
