pub mod blobs;
pub mod config;
pub mod export;
pub mod fal;
pub mod generation;
pub mod models;
pub mod prompt;
pub mod routes;
pub mod video;
pub mod workflow;

#[cfg(test)]
mod testing;
