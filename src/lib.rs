pub mod app;
pub mod audit;
pub mod authz;
pub mod bootstrap;
pub mod db;
pub mod docs;
pub mod errors;
pub mod extract;
pub mod jwt;
pub mod models;
pub mod routes;
pub mod utils;

pub use app::{create_app, AppState};
