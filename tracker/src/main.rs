use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tracker::{
    AppState,
    config::TrackerConfig,
    create_router,
    error::TrackerError,
    models::SessionKey,
    poll::{RiderInfoClient, RiderInfoSource},
    render::TracingSurface,
    route::{DirectionsClient, RouteProvider, StraightLineOnly},
    store::JsonFileStore,
    tracker::{self as runtime, Collaborators},
    transport::WsTransport,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Follow a shared trip and animate the vehicle marker")]
struct Args {
    /// Trip identifier sent as `tripid`
    #[arg(long, env = "TRACKER_TRIP_ID", default_value = "0")]
    trip_id: String,

    /// Share identifier sent as `shareID`
    #[arg(long, env = "TRACKER_SHARE_ID", default_value = "0")]
    share_id: String,

    /// Push endpoint (ws:// or wss://)
    #[arg(long, env = "TRACKER_SOCKET_URL")]
    socket_url: Url,

    /// Directions service; hops are animated as straight lines without it
    #[arg(long, env = "TRACKER_DIRECTIONS_URL")]
    directions_url: Option<Url>,

    /// Rider info endpoint polled while the push connection is down
    #[arg(long, env = "TRACKER_RIDER_INFO_URL")]
    rider_info_url: Option<Url>,

    #[arg(long, env = "TRACKER_RIDER_ID", default_value = "0")]
    rider_id: String,

    /// File holding the last known location between runs
    #[arg(long, env = "TRACKER_STORE_PATH", default_value = "tracker-state.json")]
    store_path: PathBuf,

    #[arg(long, env = "TRACKER_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), TrackerError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracker=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .build()?;

    let routes: Arc<dyn RouteProvider> = match &args.directions_url {
        Some(url) => Arc::new(DirectionsClient::new(http.clone(), url.as_str())),
        None => {
            tracing::info!("no directions service configured, using straight lines");
            Arc::new(StraightLineOnly)
        }
    };
    let rider_info = args.rider_info_url.as_ref().map(|url| {
        Arc::new(RiderInfoClient::new(http.clone(), url, &args.rider_id)) as Arc<dyn RiderInfoSource>
    });
    let store = JsonFileStore::new(&args.store_path);
    tracing::info!("last known location stored in {}", store.path().display());

    let collaborators = Collaborators {
        transport: Arc::new(WsTransport::new(args.socket_url.clone())?),
        routes,
        rider_info,
        store: Arc::new(store),
        surface: Box::new(TracingSurface),
    };

    let cancel = CancellationToken::new();
    let (handle, tracker_task) = runtime::spawn(
        TrackerConfig::default(),
        SessionKey::new(args.trip_id, args.share_id),
        collaborators,
        cancel.clone(),
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            shutdown.cancel();
        }
    });

    let app = create_router(AppState { tracker: handle });
    tracing::info!("starting tracker on http://{}", args.listen);
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    if let Err(err) = tracker_task.await {
        tracing::warn!("tracker task ended abnormally: {err}");
    }
    Ok(())
}
