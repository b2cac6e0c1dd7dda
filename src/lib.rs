pub mod backend;
pub mod config;
pub mod feed;
pub mod pipeline;
pub mod routes;
pub mod service;
pub mod tui;
