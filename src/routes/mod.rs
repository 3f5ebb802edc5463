use actix_web::{web, HttpResponse, Responder};
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;

use crate::chess::position::Position;
use crate::engine::adapter::{EngineSession, SearchLimit};
use crate::models::AppState;

const DEFAULT_SEARCH_DEPTH: u32 = 12;

/// HTTP handler for the index page
pub async fn index() -> impl Responder {
    HttpResponse::Ok().body("Chess Match Server")
}

#[derive(Debug, Deserialize)]
pub struct BestMoveRequest {
    pub fen: Option<String>,
    pub depth: Option<u32>,
}

/// HTTP handler for engine move requests. The engine process is spawned
/// lazily on the first request and kept open for later ones.
pub async fn best_move(
    app_state: web::Data<AppState>,
    body: web::Json<BestMoveRequest>,
) -> impl Responder {
    let fen = match body.fen.as_deref() {
        Some(fen) => fen,
        None => {
            return HttpResponse::BadRequest().json(json!({"error": "Missing fen"}));
        }
    };
    let position = match Position::from_fen(fen) {
        Ok(position) => position,
        Err(e) => {
            return HttpResponse::BadRequest().json(json!({"error": format!("Invalid fen: {}", e)}));
        }
    };
    let depth = body.depth.unwrap_or(DEFAULT_SEARCH_DEPTH).clamp(1, 30);

    // The search blocks for up to the response timeout, so it runs on the
    // blocking pool rather than stalling an actix worker.
    let state = app_state.clone();
    let outcome = web::block(move || -> Result<String, String> {
        let mut engine = state.engine.lock().unwrap();
        if engine.is_none() {
            let command = state
                .engine_command
                .as_deref()
                .ok_or_else(|| "No engine configured".to_string())?;
            match EngineSession::open(command) {
                Ok(session) => {
                    info!("Engine started: {}", command);
                    *engine = Some(session);
                }
                Err(e) => {
                    warn!("Failed to start engine {}: {}", command, e);
                    return Err(format!("Failed to start engine: {}", e));
                }
            }
        }
        let session = engine
            .as_mut()
            .ok_or_else(|| "Engine unavailable".to_string())?;
        match session.request_move(&position, SearchLimit::Depth(depth)) {
            Some(mv) => Ok(mv.coord()),
            None => {
                // A dead or unresponsive engine is discarded so the next
                // request respawns it.
                warn!("Engine produced no move");
                *engine = None;
                Err("Engine produced no move".to_string())
            }
        }
    })
    .await;

    match outcome {
        Ok(Ok(coord)) => HttpResponse::Ok().json(json!({"bestMove": coord})),
        Ok(Err(message)) => HttpResponse::InternalServerError().json(json!({"error": message})),
        Err(e) => {
            warn!("Engine task failed: {}", e);
            HttpResponse::InternalServerError().json(json!({"error": "Engine task failed"}))
        }
    }
}

/// Configure the HTTP routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/ws").route(web::get().to(crate::websocket::ws_index)))
        .service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/api/bestmove").route(web::post().to(best_move)));
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, App};

    use super::*;
    use crate::chess::position::INITIAL_FEN;

    #[actix_web::test]
    async fn best_move_requires_a_fen() {
        let app_state = web::Data::new(AppState::new(None));
        let app =
            test::init_service(App::new().app_data(app_state).configure(configure_routes)).await;
        let req = test::TestRequest::post()
            .uri("/api/bestmove")
            .set_json(json!({"depth": 2}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn best_move_rejects_a_malformed_fen() {
        let app_state = web::Data::new(AppState::new(None));
        let app =
            test::init_service(App::new().app_data(app_state).configure(configure_routes)).await;
        let req = test::TestRequest::post()
            .uri("/api/bestmove")
            .set_json(json!({"fen": "not a fen"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn best_move_without_an_engine_is_a_server_error() {
        let app_state = web::Data::new(AppState::new(None));
        let app =
            test::init_service(App::new().app_data(app_state).configure(configure_routes)).await;
        let req = test::TestRequest::post()
            .uri("/api/bestmove")
            .set_json(json!({"fen": INITIAL_FEN}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
