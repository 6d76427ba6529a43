pub mod config;
pub mod monitoring;
pub mod shutdown;
pub mod utils;

use std::sync::Arc;

use config::AppConfig;
use monitoring::{
    ApplianceAddress, ConnectionManager, PollSupervisor, QueryExtractor, SharedNotifier,
    TcpConnector,
};

/// Wire the production supervisor from configuration
///
/// The notifier is passed in so callers decide how messages leave the process.
pub fn build_supervisor(config: &AppConfig, notifier: SharedNotifier) -> PollSupervisor {
    let connections = ConnectionManager::new(Arc::new(TcpConnector), config.retry_policy());
    let extractor = QueryExtractor::new(config.query_limit, config.read_timeout, config.timezone);

    PollSupervisor::new(
        ApplianceAddress::new(config.pihole_host.clone(), config.pihole_port),
        connections,
        extractor,
        config.keywords.clone(),
        notifier,
    )
    .with_timings(config.poll_timings())
}
