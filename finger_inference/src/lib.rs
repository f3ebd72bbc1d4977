mod features;
mod inference_service;
mod model_service;
mod ort_service;
mod palm;
mod server;
mod state;

pub mod config;

pub use server::start_server;
