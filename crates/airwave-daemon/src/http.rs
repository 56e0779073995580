use crate::browse::{BrowseTree, ROOT_ID};
use crate::session::DaemonEvent;
use airwave_proto::protocol::{BrowseItem, Command, Direction, SleepTimerInfo};
use airwave_proto::state::StateManager;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    browse: BrowseTree,
    event_tx: mpsc::Sender<DaemonEvent>,
}

#[derive(Serialize)]
struct ApiState {
    active_station: Option<StationInfo>,
    is_playing: bool,
    is_buffering: bool,
    has_prev: bool,
    has_next: bool,
    program_title: Option<String>,
    song_title: Option<String>,
    is_favorite: bool,
    foreground: bool,
    queue: Vec<String>,
    sleep_timer: Option<SleepTimerInfo>,
}

#[derive(Serialize)]
struct StationInfo {
    key: String,
    title: String,
    city: String,
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Deserialize)]
struct PlayParams {
    key: String,
}

#[derive(Deserialize)]
struct SleepParams {
    /// Absent or zero cancels the timer.
    #[serde(default)]
    minutes: Option<u32>,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    browse: BrowseTree,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(HttpState {
            state_manager,
            browse,
            event_tx,
        });

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(app_state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/browse", get(browse_root))
        .route("/api/browse/*id", get(browse_children))
        .route("/api/item/*id", get(get_item))
        .route("/api/search", get(search))
        .route("/api/play", get(play).post(play))
        .route("/api/play-item/*id", get(play_item).post(play_item))
        .route("/api/next", get(next_station).post(next_station))
        .route("/api/prev", get(prev_station).post(prev_station))
        .route("/api/toggle", get(toggle).post(toggle))
        .route("/api/favorite", get(favorite).post(favorite))
        .route("/api/stop", get(stop).post(stop))
        .route("/api/sleep", get(sleep).post(sleep))
        .route("/api/refresh", get(refresh).post(refresh))
        .route("/api/favorites/order", post(reorder_favorites))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

async fn get_state(State(state): State<HttpState>) -> Json<ApiState> {
    let daemon_state = state.state_manager.get_state().await;
    let active_station = daemon_state.active_station().map(|s| StationInfo {
        key: s.stream_path.clone(),
        title: s.title.clone(),
        city: state.browse.city_label(&s.city_group).to_string(),
    });
    let is_favorite = daemon_state
        .playback
        .active_station
        .as_ref()
        .is_some_and(|k| daemon_state.is_favorite(k));

    Json(ApiState {
        active_station,
        is_playing: daemon_state.playback.is_playing,
        is_buffering: daemon_state.playback.is_buffering,
        has_prev: daemon_state.playback.has_prev,
        has_next: daemon_state.playback.has_next,
        program_title: daemon_state.now_playing.program_title.clone(),
        song_title: daemon_state.now_playing.song_title.clone(),
        is_favorite,
        foreground: daemon_state.foreground,
        queue: daemon_state.queue.iter().map(|k| k.to_string()).collect(),
        sleep_timer: daemon_state.sleep_timer.clone(),
    })
}

async fn browse_root(State(state): State<HttpState>) -> Json<Vec<BrowseItem>> {
    let daemon_state = state.state_manager.get_state().await;
    Json(state.browse.children(&daemon_state, ROOT_ID))
}

async fn browse_children(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Json<Vec<BrowseItem>> {
    let daemon_state = state.state_manager.get_state().await;
    Json(state.browse.children(&daemon_state, &id))
}

async fn get_item(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Json<BrowseItem>, StatusCode> {
    let daemon_state = state.state_manager.get_state().await;
    state
        .browse
        .item(&daemon_state, &id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn search(
    State(state): State<HttpState>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<BrowseItem>> {
    let daemon_state = state.state_manager.get_state().await;
    Json(state.browse.search(&daemon_state, &params.q))
}

async fn play(State(state): State<HttpState>, Query(params): Query<PlayParams>) -> StatusCode {
    info!("HTTP API: Play {}", params.key);
    let cmd = Command::Play {
        key: params.key.into(),
        queue: None,
    };
    send(&state, cmd).await
}

async fn play_item(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    info!("HTTP API: Play item {}", id);
    let daemon_state = state.state_manager.get_state().await;
    if state.browse.resolve_play(&daemon_state, &id).is_none() {
        return StatusCode::NOT_FOUND;
    }
    send(&state, Command::PlayItem { media_id: id }).await
}

async fn next_station(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Next station");
    send(&state, Command::PlayAdjacent { direction: Direction::Next }).await
}

async fn prev_station(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Previous station");
    send(&state, Command::PlayAdjacent { direction: Direction::Prev }).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle play/pause");
    send(&state, Command::TogglePlayPause).await
}

async fn favorite(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle favorite");
    send(&state, Command::ToggleFavorite).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Stop");
    send(&state, Command::StopAll).await
}

async fn sleep(State(state): State<HttpState>, Query(params): Query<SleepParams>) -> StatusCode {
    info!("HTTP API: Sleep timer {:?}", params.minutes);
    send(&state, Command::SleepTimer { minutes: params.minutes }).await
}

async fn refresh(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Refresh catalog");
    send(&state, Command::RefreshCatalog).await
}

async fn reorder_favorites(
    State(state): State<HttpState>,
    Json(keys): Json<Vec<String>>,
) -> StatusCode {
    info!("HTTP API: Reorder {} favorites", keys.len());
    let keys = keys.into_iter().map(Into::into).collect();
    send(&state, Command::ReorderFavorites { keys }).await
}

async fn send(state: &HttpState, cmd: Command) -> StatusCode {
    if state.event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
        error!("Failed to send command to session");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}
