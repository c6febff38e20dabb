use crate::core::PlayerHandle;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use futures_util::stream::{self, Stream, StreamExt};
use pkrk_proto::catalog::FetchOutcome;
use pkrk_proto::cdn::PathEncoder;
use pkrk_proto::model::{Episode, PlaybackRequest};
use pkrk_proto::protocol::{Command, SessionSnapshot};
use pkrk_proto::store::{CatalogStore, CategoriesView, ShowsView};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<CatalogStore>,
    pub player: PlayerHandle,
    pub encoder: PathEncoder,
}

#[derive(Serialize)]
struct CategoriesResponse {
    outcome: Option<FetchOutcome>,
    fetched_at: Option<String>,
    categories: Vec<CategoryInfo>,
}

#[derive(Serialize)]
struct CategoryInfo {
    category_id: String,
    display_name: String,
    description: String,
    background_url: String,
    show_count: Option<usize>,
    season_count: Option<usize>,
    subcategory_count: Option<usize>,
}

#[derive(Serialize)]
struct ShowsResponse {
    category_id: String,
    outcome: FetchOutcome,
    fetched_at: String,
    shows: Vec<ShowInfo>,
}

#[derive(Serialize)]
struct ShowInfo {
    show_id: String,
    title: String,
    description: String,
    cover_url: String,
    episodes: Vec<Episode>,
}

impl CategoriesResponse {
    fn from_view(view: &CategoriesView, encoder: &PathEncoder) -> Self {
        let categories = view
            .categories
            .iter()
            .map(|c| CategoryInfo {
                category_id: c.category_id.clone(),
                display_name: c.display_name.clone(),
                description: c.description.clone(),
                background_url: c.background_url(encoder),
                show_count: c.show_count(),
                season_count: c.season_count(),
                subcategory_count: c.subcategory_count(),
            })
            .collect();
        Self {
            outcome: view.outcome,
            fetched_at: view.fetched_at.map(|t| t.to_rfc3339()),
            categories,
        }
    }
}

impl ShowsResponse {
    fn from_view(view: &ShowsView, encoder: &PathEncoder) -> Self {
        let shows = view
            .shows
            .iter()
            .map(|s| ShowInfo {
                show_id: s.show_id.clone(),
                title: s.title.clone(),
                description: s.description.clone(),
                cover_url: s.cover_url(&view.category_id, encoder),
                episodes: s.episodes.clone(),
            })
            .collect();
        Self {
            category_id: view.category_id.clone(),
            outcome: view.outcome,
            fetched_at: view.fetched_at.to_rfc3339(),
            shows,
        }
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/categories", get(get_categories))
        .route("/api/categories/refresh", post(refresh_categories))
        .route("/api/categories/:id/shows", get(browse_category))
        .route("/api/categories/:id/sample", post(play_sample))
        .route("/api/shows", get(get_shows))
        .route(
            "/api/shows/:show_id/episodes/:episode_id/play",
            post(play_episode),
        )
        .route("/api/play", post(play_path))
        .route("/api/session", get(get_session))
        .route("/api/session/resume", post(resume))
        .route("/api/session/close", post(close))
        .route("/api/session/events", get(session_events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: HttpState,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

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

// ── catalog ───────────────────────────────────────────────────────────────────

async fn get_categories(State(state): State<HttpState>) -> Json<CategoriesResponse> {
    let view = state.store.categories().await;
    Json(CategoriesResponse::from_view(&view, &state.encoder))
}

async fn refresh_categories(State(state): State<HttpState>) -> Json<CategoriesResponse> {
    info!("HTTP API: refresh categories");
    let view = state.store.load_categories().await;
    Json(CategoriesResponse::from_view(&view, &state.encoder))
}

async fn browse_category(
    State(state): State<HttpState>,
    Path(category_id): Path<String>,
) -> Result<Json<ShowsResponse>, StatusCode> {
    if category_id.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    info!("HTTP API: browse '{}'", category_id);
    match state.store.browse_category(&category_id).await {
        Some(view) => Ok(Json(ShowsResponse::from_view(&view, &state.encoder))),
        // A newer browse owns the visible list now.
        None => Err(StatusCode::CONFLICT),
    }
}

async fn get_shows(State(state): State<HttpState>) -> Result<Json<ShowsResponse>, StatusCode> {
    let view = state.store.current_shows().ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(ShowsResponse::from_view(&view, &state.encoder)))
}

// ── playback ──────────────────────────────────────────────────────────────────

async fn send(state: &HttpState, cmd: Command) -> Result<Json<SessionSnapshot>, StatusCode> {
    match state.player.command(cmd).await {
        Ok(snapshot) => Ok(Json(snapshot)),
        Err(e) => {
            error!("HTTP API: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

async fn play_sample(
    State(state): State<HttpState>,
    Path(category_id): Path<String>,
) -> Result<Json<SessionSnapshot>, StatusCode> {
    let Some(path) = state.store.sample_audio_path_for(&category_id) else {
        warn!("HTTP API: no sample for '{}'", category_id);
        return Err(StatusCode::NOT_FOUND);
    };
    info!("HTTP API: play sample of '{}'", category_id);
    let request = PlaybackRequest::new(path, None);
    send(&state, Command::Play { request }).await
}

async fn play_episode(
    State(state): State<HttpState>,
    Path((show_id, episode_id)): Path<(String, String)>,
) -> Result<Json<SessionSnapshot>, StatusCode> {
    let Some(episode) = state.store.episode(&show_id, &episode_id) else {
        warn!("HTTP API: unknown episode {}/{}", show_id, episode_id);
        return Err(StatusCode::NOT_FOUND);
    };
    info!("HTTP API: play episode {}/{}", show_id, episode_id);
    let request = episode.playback_request();
    send(&state, Command::Play { request }).await
}

async fn play_path(
    State(state): State<HttpState>,
    Json(request): Json<PlaybackRequest>,
) -> Result<Json<SessionSnapshot>, StatusCode> {
    info!("HTTP API: play {}", request.path);
    send(&state, Command::Play { request }).await
}

async fn resume(State(state): State<HttpState>) -> Result<Json<SessionSnapshot>, StatusCode> {
    info!("HTTP API: resume");
    send(&state, Command::Resume).await
}

async fn close(State(state): State<HttpState>) -> Result<Json<SessionSnapshot>, StatusCode> {
    info!("HTTP API: close");
    send(&state, Command::Close).await
}

async fn get_session(State(state): State<HttpState>) -> Json<SessionSnapshot> {
    Json(state.player.snapshot())
}

/// Current snapshot first, then one event per session change.
async fn session_events(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let mut rx = state.player.subscribe();
    let initial = rx.borrow_and_update().clone();

    let first = stream::once(async move { Event::default().json_data(initial) });
    let updates = stream::unfold(rx, |mut rx| async move {
        rx.changed().await.ok()?;
        let snapshot = rx.borrow_and_update().clone();
        Some((Event::default().json_data(snapshot), rx))
    });

    Sse::new(first.chain(updates)).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CoreEvent;
    use pkrk_proto::catalog::CatalogClient;
    use pkrk_proto::cdn::DEFAULT_CDN_ORIGIN;
    use pkrk_proto::config::CatalogConfig;
    use pkrk_proto::session::PlaybackSession;
    use reqwest::StatusCode;
    use serde_json::Value;
    use tokio::sync::mpsc;

    /// Session driven directly, no playback surface behind it.
    fn headless_player() -> PlayerHandle {
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = PlaybackSession::new(PathEncoder::default());
        let handle = PlayerHandle::new(tx, session.subscribe());
        tokio::spawn(async move {
            while let Some(evt) = rx.recv().await {
                let CoreEvent::ClientCommand { cmd, reply } = evt else {
                    continue;
                };
                match cmd {
                    Command::Play { request } => {
                        session.start(request);
                    }
                    Command::Resume => {
                        session.resume();
                    }
                    Command::Close => {
                        session.close();
                    }
                }
                if let Some(reply) = reply {
                    let _ = reply.send(session.snapshot());
                }
            }
        });
        handle
    }

    /// Serves the API on an ephemeral port.  The catalog service is
    /// unreachable, so everything comes from the fallback.
    async fn spawn_app() -> String {
        let client = CatalogClient::new(&CatalogConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..CatalogConfig::default()
        })
        .unwrap();
        let app = router(HttpState {
            store: Arc::new(CatalogStore::new(client)),
            player: headless_player(),
            encoder: PathEncoder::default(),
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}", addr)
    }

    async fn call(base: &str, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let http = reqwest::Client::new();
        let url = format!("{}{}", base, path);
        let mut req = match method {
            "POST" => http.post(url),
            _ => http.get(url),
        };
        if let Some(json) = body {
            req = req.json(&json);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        let bytes = resp.bytes().await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_categories_from_fallback() {
        let base = spawn_app().await;
        let (status, body) = call(&base, "GET", "/api/categories", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "fallback");
        let categories = body["categories"].as_array().unwrap();
        assert_eq!(categories.len(), 4);
        let stories = categories
            .iter()
            .find(|c| c["category_id"] == "stories")
            .unwrap();
        assert_eq!(
            stories["background_url"],
            format!("{DEFAULT_CDN_ORIGIN}/images/backgrounds/stories-bg.jpg")
        );
    }

    #[tokio::test]
    async fn test_browse_then_play_episode() {
        let base = spawn_app().await;
        let (status, _) = call(&base, "GET", "/api/shows", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&base, "GET", "/api/categories/podcasts/shows", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "fallback");
        assert_eq!(body["shows"][0]["show_id"], "season1");
        assert_eq!(
            body["shows"][0]["cover_url"],
            format!("{DEFAULT_CDN_ORIGIN}/images/backgrounds/podcasts-bg.jpg")
        );

        let (status, body) =
            call(&base, "POST", "/api/shows/season1/episodes/pod_s1_e1/play", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "loading");
        assert_eq!(body["seq"], 1);
        assert_eq!(
            body["track"]["url"],
            format!("{DEFAULT_CDN_ORIGIN}/podcasts/season1/episode1.mp3")
        );

        let (status, _) =
            call(&base, "POST", "/api/shows/season1/episodes/nope/play", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sample_play() {
        let base = spawn_app().await;
        let (status, body) = call(&base, "POST", "/api/categories/film-songs/sample", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["track"]["title"], "Now Playing");
        let url = body["track"]["url"].as_str().unwrap();
        assert!(url.ends_with("Hombisilina%20%28PenduJatt.Com.Se%29.mp3"));

        let (status, _) = call(&base, "POST", "/api/categories/comedy/sample", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_play_path_then_close() {
        let base = spawn_app().await;
        let (status, body) = call(
            &base,
            "POST",
            "/api/play",
            Some(serde_json::json!({ "path": "stories/a b.mp3", "title": "A B" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["track"]["url"], format!("{DEFAULT_CDN_ORIGIN}/stories/a%20b.mp3"));

        // Nothing to resume unless autoplay was blocked.
        let (_, body) = call(&base, "POST", "/api/session/resume", None).await;
        assert_eq!(body["status"], "loading");

        let (status, body) = call(&base, "POST", "/api/session/close", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "closed");

        let (_, body) = call(&base, "GET", "/api/session", None).await;
        assert_eq!(body["status"], "closed");
        assert_eq!(body["seq"], 1);
    }
}
