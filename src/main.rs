use axum::handler::Handler;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use experiment_engine::config::AppConfig;
use experiment_engine::gateways::http::{
    HttpAdPlatformGateway, HttpDeliveryGateway, HttpPopulationProvider,
};
use experiment_engine::gateways::mock::{
    MockAdPlatformGateway, MockDeliveryGateway, MockPopulationProvider,
};
use experiment_engine::gateways::EngineGateways;
use experiment_engine::http::middleware::RateLimitState;
use experiment_engine::lifecycle::controller::{ExperimentLocks, ExperimentService};
use experiment_engine::metrics::aggregator::DedupWindow;
use experiment_engine::repo::experiments_repo::ExperimentsRepo;
use experiment_engine::repo::raw_events_repo::RawEventsRepo;
use experiment_engine::repo::variants_repo::VariantsRepo;
use experiment_engine::service::refresh_scheduler::RefreshScheduler;
use experiment_engine::stats::cache::SignificanceCache;
use experiment_engine::stats::significance::EvaluatorConfig;
use experiment_engine::AppState;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let redis_client = redis::Client::open(cfg.redis_url.clone())?;
    let significance_cache =
        SignificanceCache::new(&cfg.redis_url, cfg.significance_cache_ttl_secs)?;

    let gateways = if cfg.provider_mode == "mock" {
        EngineGateways {
            population: Arc::new(MockPopulationProvider {
                population_size: cfg.mock_population_size,
            }),
            delivery: Arc::new(MockDeliveryGateway {
                behavior: "ALWAYS_SUCCESS".to_string(),
            }),
            ads: Arc::new(MockAdPlatformGateway {
                behavior: "ALWAYS_SUCCESS".to_string(),
            }),
        }
    } else {
        EngineGateways {
            population: Arc::new(HttpPopulationProvider {
                base_url: cfg.population_base_url.clone(),
                api_key: cfg.provider_api_key.clone(),
                timeout_ms: cfg.gateway_timeout_ms,
                client: reqwest::Client::new(),
            }),
            delivery: Arc::new(HttpDeliveryGateway {
                base_url: cfg.delivery_base_url.clone(),
                api_key: cfg.provider_api_key.clone(),
                timeout_ms: cfg.gateway_timeout_ms,
                client: reqwest::Client::new(),
            }),
            ads: Arc::new(HttpAdPlatformGateway {
                base_url: cfg.ads_base_url.clone(),
                api_key: cfg.provider_api_key.clone(),
                timeout_ms: cfg.gateway_timeout_ms,
                client: reqwest::Client::new(),
            }),
        }
    };

    let service = ExperimentService {
        experiments_repo: ExperimentsRepo { pool: pool.clone() },
        variants_repo: VariantsRepo { pool: pool.clone() },
        raw_events_repo: RawEventsRepo { pool: pool.clone() },
        gateways,
        significance_cache,
        evaluator_config: EvaluatorConfig {
            min_sample_floor: cfg.min_sample_floor,
            alpha: cfg.significance_alpha,
        },
        locks: ExperimentLocks::default(),
        dedup: Arc::new(tokio::sync::Mutex::new(DedupWindow::new(
            cfg.dedup_window_size,
        ))),
    };

    let scheduler = RefreshScheduler {
        service: service.clone(),
        interval: std::time::Duration::from_secs(cfg.refresh_interval_secs),
        max_retries: cfg.refresh_max_retries,
    };
    tokio::spawn(scheduler.run());

    let state = AppState {
        service,
        redis_client: redis::Client::open(cfg.redis_url.clone())?,
    };

    // Mutating routes sit behind the internal API key; reads, event
    // ingestion, and the ops probes are open to the cluster.
    let guard = from_fn_with_state(
        cfg.internal_api_key.clone(),
        experiment_engine::http::middleware::require_internal_api_key,
    );
    let app = Router::new()
        .route("/health", get(experiment_engine::http::handlers::ops::health))
        .route(
            "/experiments",
            get(experiment_engine::http::handlers::experiments::list_experiments).post(
                experiment_engine::http::handlers::experiments::create_experiment
                    .layer(guard.clone()),
            ),
        )
        .route(
            "/experiments/:id",
            get(experiment_engine::http::handlers::experiments::get_experiment).delete(
                experiment_engine::http::handlers::experiments::delete_experiment
                    .layer(guard.clone()),
            ),
        )
        .route(
            "/experiments/:id/variants",
            post(experiment_engine::http::handlers::experiments::add_variant.layer(guard.clone())),
        )
        .route(
            "/experiments/:id/start",
            post(experiment_engine::http::handlers::lifecycle::start_experiment.layer(guard.clone())),
        )
        .route(
            "/experiments/:id/pause",
            post(experiment_engine::http::handlers::lifecycle::pause_experiment.layer(guard.clone())),
        )
        .route(
            "/experiments/:id/resume",
            post(experiment_engine::http::handlers::lifecycle::resume_experiment.layer(guard.clone())),
        )
        .route(
            "/experiments/:id/cancel",
            post(experiment_engine::http::handlers::lifecycle::cancel_experiment.layer(guard.clone())),
        )
        .route(
            "/experiments/:id/winner",
            post(experiment_engine::http::handlers::lifecycle::declare_winner.layer(guard.clone())),
        )
        .route(
            "/experiments/:id/send-remainder",
            post(experiment_engine::http::handlers::lifecycle::send_remainder.layer(guard.clone())),
        )
        .route(
            "/experiments/:id/refresh",
            post(experiment_engine::http::handlers::lifecycle::refresh_experiment.layer(guard)),
        )
        .route(
            "/experiments/:id/results",
            get(experiment_engine::http::handlers::results::get_results),
        )
        .route(
            "/experiments/:id/significance",
            get(experiment_engine::http::handlers::results::get_significance),
        )
        .route(
            "/events",
            post(experiment_engine::http::handlers::events::record_event),
        )
        .route(
            "/ops/readiness",
            get(experiment_engine::http::handlers::ops::readiness),
        )
        .route(
            "/ops/liveness",
            get(experiment_engine::http::handlers::ops::liveness),
        )
        .layer(from_fn_with_state(
            RateLimitState {
                redis_client: redis::Client::open(cfg.redis_url.clone())?,
                max_per_minute: 300,
            },
            experiment_engine::http::middleware::rate_limit,
        ))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!("listening on {}", cfg.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
