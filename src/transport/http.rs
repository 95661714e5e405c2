use std::{collections::HashMap, time::Instant};

use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode as HttpStatus},
    response::{IntoResponse, Response},
    routing::{any, get},
    Form, Json, Router,
};
use kometa_error::{KometaResult, StackError};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use super::{
    files::content_type, log_command_error, router::route, websocket, CommandContext, Reply,
    SubscribeReply, TransportState,
};

/// Файл, отдаваемый на `/`.
const INDEX_FILE: &str = "index.html";

/// Контекст HTTP-запроса: параметры из строки запроса и тела формы.
struct HttpContext {
    params: HashMap<String, String>,
    reply: Option<Reply>,
}

/// Собирает HTTP-приложение: команды, WebSocket и CORS для любых источников.
pub fn app(state: TransportState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", any(index_handler))
        .route("/ws", get(websocket::upgrade))
        .route("/:command", any(command_handler))
        .layer(cors)
        .with_state(state)
}

async fn index_handler(
    State(state): State<TransportState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    handle(state, INDEX_FILE.to_string(), query, None).await
}

async fn command_handler(
    State(state): State<TransportState>,
    Path(command): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    form: Option<Form<HashMap<String, String>>>,
) -> Response {
    handle(state, command, query, form.map(|Form(f)| f)).await
}

async fn handle(
    state: TransportState,
    command: String,
    mut params: HashMap<String, String>,
    form: Option<HashMap<String, String>>,
) -> Response {
    let started = Instant::now();
    // Значения из тела формы важнее строки запроса.
    if let Some(form) = form {
        params.extend(form);
    }

    let mut ctx = HttpContext {
        params,
        reply: None,
    };
    let result = route(&state.hub, state.files.as_ref(), &command, &mut ctx).await;

    let response = match result {
        Ok(()) => reply_response(ctx.reply.unwrap_or(Reply::Empty)),
        Err(e) => error_response(&command, &e),
    };
    info!(
        command = %command,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
        "HTTP request served"
    );
    response
}

fn reply_response(reply: Reply) -> Response {
    match reply {
        Reply::Text(text) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            text,
        )
            .into_response(),
        Reply::Subscribed { subscriber_id } => {
            Json(SubscribeReply::new(subscriber_id)).into_response()
        }
        Reply::Data(response) => Json(response).into_response(),
        Reply::File { name, bytes } => {
            ([(header::CONTENT_TYPE, content_type(&name))], bytes).into_response()
        }
        Reply::NotFound => HttpStatus::NOT_FOUND.into_response(),
        Reply::Empty => HttpStatus::OK.into_response(),
    }
}

fn error_response(
    command: &str,
    err: &StackError,
) -> Response {
    let status = HttpStatus::from_u16(err.status_code().http_status())
        .unwrap_or(HttpStatus::INTERNAL_SERVER_ERROR);
    log_command_error(command, err);
    (status, Json(err.to_response())).into_response()
}

#[async_trait]
impl CommandContext for HttpContext {
    fn param(
        &self,
        name: &str,
    ) -> Option<String> {
        self.params.get(name).cloned()
    }

    async fn respond(
        &mut self,
        reply: Reply,
    ) -> KometaResult<()> {
        self.reply = Some(reply);
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
