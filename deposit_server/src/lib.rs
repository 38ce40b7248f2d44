//! # Deposit server
//! This crate hosts the runnable shell around the settlement engine. It is responsible for:
//! * Exposing an HTTP trigger, so that the ingestion side can ask for a payment to be settled as soon as it lands.
//! * Running the polling reconciliation worker, which picks up any payment that a trigger missed.
//! * Providing the production collaborators: the casino settlement gateway, the Telegram notifier and the commission
//!   sink.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/payments/{id}/process`: Runs the settlement flow for the given incoming payment.

pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod integrations;
pub mod reconciliation_worker;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
