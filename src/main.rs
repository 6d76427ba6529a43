use std::sync::Arc;

use pihole_notifier::config::AppConfig;
use pihole_notifier::monitoring::TelegramNotifier;
use pihole_notifier::shutdown::cancel_on_signal;
use pihole_notifier::utils::logging::{init_logging, LogSettings};
use pihole_notifier::build_supervisor;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    // 1. 환경변수 로드
    dotenvy::dotenv().ok();

    // 2. 로깅 초기화
    let _log_guard = init_logging(&LogSettings::from_env());
    tracing::info!("Pi-hole Telegram notifier starting...");

    // 3. 설정 로드
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(
        pihole_host = %config.pihole_host,
        pihole_port = config.pihole_port,
        timezone = %config.timezone,
        keywords = ?config.keywords.as_slice(),
        chat_id = %config.telegram_chat_id,
        "Configuration loaded"
    );

    // 4. 알림 채널 및 감시 루프 구성
    let notifier = Arc::new(TelegramNotifier::from_config(&config));
    let supervisor = build_supervisor(&config, notifier);

    // 5. 실행
    let shutdown = CancellationToken::new();
    let _signals = cancel_on_signal(shutdown.clone());
    supervisor.run(shutdown).await;

    tracing::info!("Pi-hole Telegram notifier stopped");
}
