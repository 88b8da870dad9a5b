//! HTTP API surface: request/response models and axum handlers.
//!
//! The route table itself is assembled in [`crate::build_router`].

pub mod handlers;
pub mod models;
