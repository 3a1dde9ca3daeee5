//! API Module
//!
//! HTTP handlers and routing exposing the storage engine and the auto-save
//! coordinator over REST. See [`create_router`] for the endpoint list.

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
