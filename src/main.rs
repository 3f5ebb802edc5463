use actix_web::{web, App, HttpServer};
use log::info;

use chess_match_server::models::AppState;
use chess_match_server::routes::configure_routes;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let engine_command = std::env::var("ENGINE_CMD").ok();

    info!("Starting chess match server at http://{}", bind_addr);
    if let Some(command) = &engine_command {
        info!("Engine hints enabled via: {}", command);
    }

    // Create shared application state
    let app_state = web::Data::new(AppState::new(engine_command));

    // Start HTTP server
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(configure_routes)
    })
    .bind(bind_addr)?
    .run()
    .await
}
