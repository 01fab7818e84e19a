//! Background job workers for the organizing platform.
//!
//! Jobs live in a shared Postgres table. Any number of worker processes
//! reserve them with a conditional update, run the processor registered for
//! the job's type, and write the outcome back. Failed attempts are retried
//! with capped exponential backoff. Locks held by crashed workers are
//! reclaimed, and a graceful shutdown requeues whatever is still in flight.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
