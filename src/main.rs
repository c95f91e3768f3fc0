use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pullsync::bus::MemoryBus;
use pullsync::config::Config;
use pullsync::events::git::GitEventReporter;
use pullsync::events::pullreq::PullReqEventReporter;
use pullsync::git::MemoryGit;
use pullsync::mergecheck::{CancelChannel, MergeCheckService};
use pullsync::server::{build_router, AppState};
use pullsync::store::{ActivityStore, PullReqStore, RepoStore};
use pullsync::sync::SyncService;
use pullsync::timeline::ActivityService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pullsync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let bus = MemoryBus::new();
    let git = Arc::new(MemoryGit::new());
    let pullreq_store = PullReqStore::new();
    let repo_store = RepoStore::new();
    let activity_store = ActivityStore::new();

    let sync = SyncService::new(
        pullreq_store.clone(),
        repo_store.clone(),
        Arc::clone(&git),
        ActivityService::new(pullreq_store.clone(), activity_store.clone()),
        PullReqEventReporter::new(bus.clone()),
    );
    let mergecheck = MergeCheckService::new(
        pullreq_store.clone(),
        repo_store.clone(),
        Arc::clone(&git),
        CancelChannel::new(),
    );

    let sync_sub = sync.subscribe(&bus, &config.consumer_id, config.subscribe_options())?;
    let mergecheck_sub =
        mergecheck.subscribe(&bus, &config.consumer_id, config.subscribe_options())?;

    let app = build_router(AppState::new(
        config.hook_secret.clone(),
        GitEventReporter::new(bus.clone()),
    ));

    tracing::info!(addr = %config.bind_addr, "listening");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    sync_sub.shutdown().await;
    mergecheck_sub.shutdown().await;
    Ok(())
}
