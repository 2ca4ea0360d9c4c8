//! Phased HTTP load generation.
//!
//! A [`dispatcher::Dispatcher`] asks a [`load_models::RateShaper`] for the
//! target rate once per tick and enqueues that many tokens into a
//! [`intake::TokenIntake`]. A fixed [`worker::WorkerPool`] turns each token into
//! one request through a [`transport::Transport`] and folds the outcome into a
//! [`aggregator::MetricsAggregator`]. [`runner::LoadTest`] wires one run
//! together and produces a [`report::Report`].

pub mod aggregator;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod intake;
pub mod load_models;
pub mod metrics;
pub mod monitor;
pub mod report;
pub mod runner;
pub mod transport;
pub mod utils;
pub mod worker;
