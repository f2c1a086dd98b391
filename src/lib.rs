//! Check-in Photo Face Screening
//!
//! This library provides the batch engine behind the face-screen service:
//! it takes a CSV of check-in records, fetches each row's photo, runs it
//! through a primary and a fallback face detector on Cloudflare Workers AI,
//! and writes the annotated CSV back out with progress tracking,
//! checkpointing and cooperative cancellation.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
