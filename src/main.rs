mod call;
mod config;
mod control;
mod error;
mod events;
mod persistence;
mod provider;
mod session;
mod setup;
mod state;
mod twilio;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use config::Config;
use events::EventBus;
use persistence::{CallRepository, SqliteCallRepository};
use session::manager::SessionManager;
use twilio::client::TwilioClient;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared application state accessible from every handler: the carrier
/// media-stream WebSocket, the Twilio webhooks, and the control plane all
/// reach the same [`SessionManager`]/[`CallRepository`]/[`EventBus`].
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repository: Arc<dyn CallRepository>,
    pub session_manager: Arc<SessionManager>,
    pub events: Arc<EventBus>,
    pub twilio: Arc<TwilioClient>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("--setup") => setup::run(),
        Some("--version") => println!("voice-bridge {VERSION}"),
        Some("--help") | Some("-h") => print_usage(),
        Some(other) => {
            eprintln!("Unknown option: {other}");
            print_usage();
            std::process::exit(1);
        }
        None => {
            let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
            rt.block_on(server());
        }
    }
}

fn print_usage() {
    println!("voice-bridge {VERSION}");
    println!("Realtime voice-agent bridge between Twilio and OpenAI/ElevenLabs");
    println!();
    println!("Usage: voice-bridge [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --setup     Run interactive configuration wizard");
    println!("  --version   Print version");
    println!("  --help, -h  Print this help message");
    println!();
    println!("Without options, starts the session server.");
}

async fn server() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_bridge=info,tower_http=info".into()),
        )
        .init();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        caps_total = config.caps.max_concurrent_calls,
        "Starting voice-bridge"
    );

    let repository: Arc<dyn CallRepository> = match SqliteCallRepository::open(&config.storage.sqlite_path) {
        Ok(repo) => Arc::new(repo),
        Err(e) => {
            eprintln!("Failed to open call store at {}: {e}", config.storage.sqlite_path);
            std::process::exit(1);
        }
    };

    let twilio = Arc::new(TwilioClient::new(&config.twilio, &config.server.external_url));
    let session_manager = Arc::new(SessionManager::new(config.caps.clone()));
    let events = Arc::new(EventBus::default());
    let config = Arc::new(config);

    let state = AppState { config: config.clone(), repository, session_manager, events, twilio };

    let app = Router::new()
        // Twilio voice webhooks
        .route("/twilio/voice", post(twilio::webhook::handle_voice))
        .route("/twilio/voice/outbound", post(twilio::webhook::handle_voice_outbound))
        .route("/twilio/voice/hold", post(twilio::webhook::handle_voice_hold))
        .route("/twilio/voice/dtmf", post(twilio::webhook::handle_voice_dtmf))
        // Twilio Media Streams WebSocket
        .route("/twilio/media", get(twilio::media::handle_media))
        // Control plane (C6)
        .route("/calls/create", post(control::calls::create_call))
        .route("/calls/{call_id}/hold", post(control::calls::hold))
        .route("/calls/{call_id}/resume", post(control::calls::resume))
        .route("/calls/{call_id}/hangup", post(control::calls::hangup))
        .route("/calls/{call_id}/inject-context", post(control::calls::inject_context))
        .route("/calls/{call_id}/dtmf", post(control::calls::dtmf))
        .route("/emergency-shutdown", post(control::shutdown::emergency_shutdown))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .expect("Invalid server address");

    tracing::info!(%addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await.expect("Failed to bind");
    axum::serve(listener, app).await.expect("Server error");
}

async fn health() -> &'static str {
    "ok"
}
