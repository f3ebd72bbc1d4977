mod camera;
mod cv_utils;
mod hand;
mod hand_state;
mod prediction;
mod routes;
mod server;
mod stream;
mod telemetry;

pub mod app;
pub mod config;

pub use app::start_app;
