use voice_leads::access::SessionStore;
use voice_leads::config::Config;
use voice_leads::crm::RestLeadApi;
use voice_leads::event_log::EventLog;
use voice_leads::extract::Extractor;
use voice_leads::leads::LeadResolver;
use voice_leads::notify::Notifier;
use voice_leads::quality::QualityFilter;
use voice_leads::store::{LeadStore, MySqlLeadStore};
use voice_leads::transcript::TranscriptEngine;
use voice_leads::twilio::TwilioClient;
use voice_leads::types::AppState;
use voice_leads::utils;

use sqlx::mysql::MySqlPoolOptions;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("no .env loaded: {e}");
    }
    let config = Config::from_env().expect("invalid configuration");

    let crate_level = config
        .log_level
        .as_deref()
        .and_then(|l| LevelFilter::from_str(l).ok())
        .unwrap_or(LevelFilter::DEBUG);
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", LevelFilter::OFF),
            ("voice_leads", crate_level),
        ]));
    tracing::subscriber::set_global_default(subscriber).expect("failed to install subscriber");

    let http_client = utils::http_client();
    let twilio = TwilioClient::new(
        http_client.clone(),
        config.twilio.clone(),
        config.intelligence.clone(),
    );
    let quality = QualityFilter::from_config(&config.quality).expect("invalid quality patterns");

    let lead_store: Option<Arc<dyn LeadStore>> = match &config.crm.database_url {
        Some(url) => {
            let pool = MySqlPoolOptions::new()
                .max_connections(5)
                .connect_lazy(url)
                .expect("invalid CRM_DATABASE_URL");
            Some(Arc::new(MySqlLeadStore::new(pool)))
        }
        None => {
            warn!("CRM_DATABASE_URL not set; dedupe, field discovery and direct insert are off");
            None
        }
    };
    let lead_api = Arc::new(RestLeadApi::new(http_client.clone(), config.crm.clone()));

    let bind_addr = SocketAddr::from_str(&config.bind_addr).expect("invalid BIND_ADDR");
    let app_state = Arc::new(AppState {
        transcripts: TranscriptEngine::from_config(http_client.clone(), &config, twilio.clone()),
        extractor: Extractor::from_config(http_client.clone(), &config.openai),
        leads: LeadResolver::new(config.crm.clone(), lead_api, lead_store),
        notifier: Notifier::from_config(http_client, config.notify.clone()),
        event_log: EventLog::new(config.event_log_path.clone()),
        sessions: SessionStore::default(),
        quality,
        twilio,
        config,
    });

    info!(addr = %bind_addr, "listening");
    axum::Server::bind(&bind_addr)
        .serve(voice_leads::app(app_state).into_make_service())
        .await
        .unwrap();
}
