//! # deskclaw-gateway
//! HTTP control API for the scheduler. Thin by design: every handler is a
//! read or command wrapper around the `Scheduler` handle, so the dashboard
//! and CLI go through the same dedup/record path as the poll loop.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, serve};
