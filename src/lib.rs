//! ncm-gateway - A thin HTTP gateway for NetEase Cloud Music
//!
//! This library provides the pieces of a small REST-ish gateway that:
//! - Maps a fixed set of `/api/...` paths to music service operations
//! - Validates the required query parameters of each route
//! - Relays the service's raw status and JSON body back to the caller
//! - Shares vendor session cookies between callers through a cookie jar
//! - Sets permissive CORS headers on every response
//! - Drains in-flight requests on shutdown within a grace period

pub mod config;
pub mod cookies;
pub mod cors;
pub mod error;
pub mod handlers;
pub mod pages;
pub mod router;
pub mod server;
pub mod service;
pub mod upstream;
