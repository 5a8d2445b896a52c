//! REST API server: routes, authentication, DTOs, live events and OpenAPI documentation.

pub mod auth;
pub mod config;
pub mod dto;
pub mod error;
pub mod observer;
pub mod openapi;
pub mod routes;
pub mod state;
