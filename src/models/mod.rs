//! Request and Response models for the auto-save engine API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{
    validate_key, BackendQuery, SaveEntryRequest, SetPathRequest, SetValueRequest, MAX_KEY_LEN,
};
pub use responses::{
    DeleteResponse, EntriesResponse, ErrorResponse, FlushResponse, HealthResponse,
    ImportResponse, KeysResponse, SaveEntryResponse, SetResponse, StatsResponse,
    TerminationResponse, ValueResponse,
};
