use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use manhunt_server::app::{now_ms, App};
use manhunt_server::errors::{invalid_input, ApiError};
use manhunt_server::store::Store;
use manhunt_server::types::{
    GameSettingsPatch, LoginInput, NewGameInput, NewUserInput, UserSettingsPatch,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

const SESSION_HEADER: &str = "x-session-id";

type SharedApp = Arc<App>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "manhunt_server=info,tower_http=info".into()),
        )
        .init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let data_dir = std::env::var("DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".data"));

    tracing::info!("data directory: {}", data_dir.to_string_lossy());
    let app = Arc::new(App::new(Store::new(data_dir), now_ms()));

    let router = Router::new()
        .route("/create-user", post(create_user))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route(
            "/user-settings",
            get(user_settings).post(update_user_settings),
        )
        .route("/user", get(public_user))
        .route("/create-game", post(create_game))
        .route("/delete-game", post(delete_game))
        .route(
            "/game-settings",
            get(game_settings).post(update_game_settings),
        )
        .route("/game", get(game_view))
        .route("/games", get(list_games))
        .route("/names", get(names))
        .route("/join", post(join))
        .route("/leave", post(leave))
        .route("/start", post(start))
        .route("/shuffle", post(shuffle))
        .route("/status", get(status))
        .route("/statuses", get(statuses))
        .route("/kill", post(kill))
        .route("/notifications", get(notifications))
        .route("/read", post(mark_read))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(app);

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind server socket");

    tracing::info!("listening on :{port}");
    axum::serve(listener, router)
        .await
        .expect("server runtime failed");
}

// Error half of every handler result. Maps the error class to its status
// code and renders the `{"error": ...}` body the clients expect.
struct Failure(ApiError);

impl From<ApiError> for Failure {
    fn from(error: ApiError) -> Self {
        Self(error)
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn session_of(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
}

fn required<'a>(raw: Option<&'a str>, name: &str) -> Result<&'a str, ApiError> {
    match raw.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(invalid_input(format!(
            "a {name} query parameter is required"
        ))),
    }
}

fn parse_count(name: &str, raw: Option<&str>) -> Result<Option<usize>, ApiError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().parse::<usize>() {
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(invalid_input(format!(
            "{name} must be a non-negative integer"
        ))),
    }
}

fn parse_flag(raw: Option<&str>) -> bool {
    match raw {
        None => false,
        Some(value) => value.is_empty() || value == "1" || value.eq_ignore_ascii_case("true"),
    }
}

fn parse_id_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Deserialize)]
struct GameQuery {
    game: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    query: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LeaveQuery {
    game: Option<String>,
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KillQuery {
    game: Option<String>,
    #[serde(rename = "self")]
    self_report: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    from: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamesQuery {
    games: Option<String>,
    users: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JoinBody {
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LeaveBody {
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct KillBody {
    code: Option<String>,
}

async fn create_user(
    State(app): State<SharedApp>,
    Json(input): Json<NewUserInput>,
) -> Result<impl IntoResponse, Failure> {
    Ok(Json(app.create_user(&input, now_ms())?))
}

async fn login(
    State(app): State<SharedApp>,
    Json(input): Json<LoginInput>,
) -> Result<impl IntoResponse, Failure> {
    Ok(Json(app.login(&input, now_ms())?))
}

async fn logout(State(app): State<SharedApp>, headers: HeaderMap) -> impl IntoResponse {
    app.logout(session_of(&headers));
    Json(json!({}))
}

async fn user_settings(
    State(app): State<SharedApp>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, Failure> {
    Ok(Json(app.user_settings(session_of(&headers), now_ms())?))
}

async fn update_user_settings(
    State(app): State<SharedApp>,
    headers: HeaderMap,
    Json(patch): Json<UserSettingsPatch>,
) -> Result<impl IntoResponse, Failure> {
    Ok(Json(app.update_user_settings(
        session_of(&headers),
        &patch,
        now_ms(),
    )?))
}

async fn public_user(
    State(app): State<SharedApp>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, Failure> {
    let username = required(query.user.as_deref(), "user")?;
    Ok(Json(app.public_user(username)?))
}

async fn create_game(
    State(app): State<SharedApp>,
    headers: HeaderMap,
    Json(input): Json<NewGameInput>,
) -> Result<impl IntoResponse, Failure> {
    Ok(Json(app.create_game(session_of(&headers), &input, now_ms())?))
}

async fn delete_game(
    State(app): State<SharedApp>,
    headers: HeaderMap,
    Query(query): Query<GameQuery>,
) -> Result<impl IntoResponse, Failure> {
    let game_id = required(query.game.as_deref(), "game")?;
    app.delete_game(session_of(&headers), game_id, now_ms())?;
    Ok(Json(json!({})))
}

async fn game_settings(
    State(app): State<SharedApp>,
    headers: HeaderMap,
    Query(query): Query<GameQuery>,
) -> Result<impl IntoResponse, Failure> {
    let game_id = required(query.game.as_deref(), "game")?;
    Ok(Json(app.game_settings(
        session_of(&headers),
        game_id,
        now_ms(),
    )?))
}

async fn update_game_settings(
    State(app): State<SharedApp>,
    headers: HeaderMap,
    Query(query): Query<GameQuery>,
    Json(patch): Json<GameSettingsPatch>,
) -> Result<impl IntoResponse, Failure> {
    let game_id = required(query.game.as_deref(), "game")?;
    Ok(Json(app.update_game_settings(
        session_of(&headers),
        game_id,
        &patch,
        now_ms(),
    )?))
}

async fn game_view(
    State(app): State<SharedApp>,
    Query(query): Query<GameQuery>,
) -> Result<impl IntoResponse, Failure> {
    let game_id = required(query.game.as_deref(), "game")?;
    Ok(Json(app.game_view(game_id)?))
}

async fn list_games(
    State(app): State<SharedApp>,
    Query(query): Query<SearchQuery>,
) -> impl IntoResponse {
    Json(app.list_games(query.query.as_deref()))
}

async fn names(State(app): State<SharedApp>, Query(query): Query<NamesQuery>) -> impl IntoResponse {
    let game_ids = parse_id_list(query.games.as_deref());
    let usernames = parse_id_list(query.users.as_deref());
    Json(app.names(&game_ids, &usernames))
}

async fn join(
    State(app): State<SharedApp>,
    headers: HeaderMap,
    Query(query): Query<GameQuery>,
    body: Option<Json<JoinBody>>,
) -> Result<impl IntoResponse, Failure> {
    let game_id = required(query.game.as_deref(), "game")?;
    let body = body.map(|Json(body)| body).unwrap_or_default();
    Ok(Json(app.join(
        session_of(&headers),
        game_id,
        body.password.as_deref(),
        now_ms(),
    )?))
}

async fn leave(
    State(app): State<SharedApp>,
    headers: HeaderMap,
    Query(query): Query<LeaveQuery>,
    body: Option<Json<LeaveBody>>,
) -> Result<impl IntoResponse, Failure> {
    let game_id = required(query.game.as_deref(), "game")?;
    let body = body.map(|Json(body)| body).unwrap_or_default();
    app.leave(
        session_of(&headers),
        game_id,
        query.user.as_deref(),
        body.reason.as_deref(),
        now_ms(),
    )?;
    Ok(Json(json!({})))
}

async fn start(
    State(app): State<SharedApp>,
    headers: HeaderMap,
    Query(query): Query<GameQuery>,
) -> Result<impl IntoResponse, Failure> {
    let game_id = required(query.game.as_deref(), "game")?;
    Ok(Json(app.start(session_of(&headers), game_id, now_ms())?))
}

async fn shuffle(
    State(app): State<SharedApp>,
    headers: HeaderMap,
    Query(query): Query<GameQuery>,
) -> Result<impl IntoResponse, Failure> {
    let game_id = required(query.game.as_deref(), "game")?;
    app.shuffle(session_of(&headers), game_id, now_ms())?;
    Ok(Json(json!({})))
}

async fn status(
    State(app): State<SharedApp>,
    headers: HeaderMap,
    Query(query): Query<GameQuery>,
) -> Result<impl IntoResponse, Failure> {
    let game_id = required(query.game.as_deref(), "game")?;
    Ok(Json(app.status(session_of(&headers), game_id, now_ms())?))
}

async fn statuses(
    State(app): State<SharedApp>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, Failure> {
    Ok(Json(app.statuses(session_of(&headers), now_ms())?))
}

async fn kill(
    State(app): State<SharedApp>,
    headers: HeaderMap,
    Query(query): Query<KillQuery>,
    body: Option<Json<KillBody>>,
) -> Result<impl IntoResponse, Failure> {
    let game_id = required(query.game.as_deref(), "game")?;
    let self_report = parse_flag(query.self_report.as_deref());
    let body = body.map(|Json(body)| body).unwrap_or_default();
    app.kill(
        session_of(&headers),
        game_id,
        body.code.as_deref(),
        self_report,
        now_ms(),
    )?;
    Ok(Json(json!({})))
}

async fn notifications(
    State(app): State<SharedApp>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, Failure> {
    let from = parse_count("from", query.from.as_deref())?;
    let limit = parse_count("limit", query.limit.as_deref())?;
    Ok(Json(app.notifications(
        session_of(&headers),
        from,
        limit,
        now_ms(),
    )?))
}

async fn mark_read(
    State(app): State<SharedApp>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, Failure> {
    app.mark_read(session_of(&headers), now_ms())?;
    Ok(Json(json!({})))
}

async fn stats(State(app): State<SharedApp>) -> impl IntoResponse {
    Json(app.stats_view())
}
