use sipphone::application::metrics;
use sipphone::config::Config;
use sipphone::domain::account::AccountConfig;
use sipphone::domain::call::HeaderMap;
use sipphone::infrastructure::LoopbackStack;
use sipphone::interface::events::spawn_json_logger;
use sipphone::interface::EventBroadcaster;
use sipphone::Phone;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Time given to the event loop to apply what the loopback stack reported
const SETTLE: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = std::env::var_os("SIPPHONE_CONFIG").map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting sipphone");
    info!("Configuration loaded: {:?}", config);
    metrics::describe_metrics();

    let (stack, stack_events) = LoopbackStack::new();
    let stack = Arc::new(stack.with_auto_progress(true));

    let broadcaster = EventBroadcaster::default();
    let logger = spawn_json_logger(&broadcaster);

    let phone = Arc::new(Phone::new(stack.clone()).with_notifier(Arc::new(broadcaster.clone())));
    let event_loop = phone.spawn_event_loop(stack_events);

    if !phone.init(config.phone.clone()) {
        anyhow::bail!("Phone initialization failed: {}", phone.error_message());
    }

    let account = config.account.clone().unwrap_or_else(|| {
        AccountConfig::new("sip:demo@example.com", "sip:example.com", "demo").with_password("demo")
    });
    demo_session(&phone, &stack, account).await?;

    info!("Shutting down");
    if !phone.shutdown() {
        warn!("Shutdown reported: {}", phone.error_message());
    }

    // Let late stack replies and queued notifications drain before exiting
    tokio::time::sleep(SETTLE).await;
    event_loop.abort();
    logger.abort();

    info!("sipphone stopped");
    Ok(())
}

async fn demo_session(
    phone: &Arc<Phone>,
    stack: &Arc<LoopbackStack>,
    account: AccountConfig,
) -> anyhow::Result<()> {
    info!("=== Registration ===");
    if !phone.register_user(account) {
        anyhow::bail!("Registration rejected: {}", phone.error_message());
    }
    tokio::time::sleep(SETTLE).await;
    info!("Registered: {}", phone.check_account_status());
    info!("Account info: {}", serde_json::Value::Object(phone.get_account_info()));

    info!("=== Outgoing call ===");
    let call = phone
        .make_call("sip:echo@example.com")
        .ok_or_else(|| anyhow::anyhow!("Call rejected: {}", phone.error_message()))?;
    tokio::time::sleep(SETTLE).await;
    info!("Active calls: {:?}", phone.get_active_call_list());

    if phone.send_dtmf_digits(call.id(), "1234#") {
        info!("DTMF sent on {}", call.id());
    }

    info!("=== Incoming call ===");
    let mut headers = HeaderMap::new();
    headers.insert("X-Demo".to_string(), "true".to_string());
    let incoming = stack.simulate_incoming_call("sip:alice@example.com", Some("Alice".to_string()), headers);
    tokio::time::sleep(SETTLE).await;
    phone.answer_call(incoming);
    tokio::time::sleep(SETTLE).await;
    info!("Active calls: {:?}", phone.get_active_call_list());

    info!("=== Media ===");
    phone.set_sound_signal(0.8);
    phone.set_micro_signal(0.6);
    info!("Signal levels: {:?}", phone.get_signal_levels());
    info!("Codecs: {:?}", phone.get_codec_priorities());
    info!("Sound devices: {:?}", phone.get_sound_devices());

    info!("=== Teardown ===");
    phone.hang_up_all();
    tokio::time::sleep(SETTLE).await;
    info!("Active calls: {:?}", phone.get_active_call_list());

    Ok(())
}
