pub mod config;
pub mod domain {
    pub mod error;
    pub mod experiment;
    pub mod variant;
}
pub mod allocation {
    pub mod planner;
}
pub mod gateways;
pub mod http {
    pub mod middleware;
    pub mod handlers {
        pub mod events;
        pub mod experiments;
        pub mod lifecycle;
        pub mod ops;
        pub mod results;
    }
}
pub mod lifecycle {
    pub mod controller;
    pub mod transitions;
}
pub mod metrics {
    pub mod aggregator;
    pub mod event;
}
pub mod repo {
    pub mod experiments_repo;
    pub mod raw_events_repo;
    pub mod variants_repo;
}
pub mod service {
    pub mod refresh_scheduler;
}
pub mod stats {
    pub mod cache;
    pub mod significance;
}

#[derive(Clone)]
pub struct AppState {
    pub service: lifecycle::controller::ExperimentService,
    pub redis_client: redis::Client,
}
