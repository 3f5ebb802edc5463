pub mod chess;
pub mod engine;
pub mod game;
pub mod models;
pub mod routes;
pub mod sync;
pub mod websocket;
