//! Product Image Batch Processing
//!
//! This library provides the core of the product-image-batch service: batches
//! of product rows are admitted as jobs, every source image is fetched and
//! re-encoded concurrently, results are persisted per job, and a webhook is
//! sent once a job completes.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
