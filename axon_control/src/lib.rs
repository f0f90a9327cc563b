//! # Axon Control
//!
//! Real-time single-axis servo motion controller for CiA 402 drives over a
//! cyclic fieldbus exchange.
//!
//! The controller runs two threads: the real-time cyclic task (scheduler,
//! bus monitor, drive state machine, motion profiler) and a supervisory task
//! (startup sequencing, command submission, diagnostics, status rendering).
//! They share one [`axon_common::shared::SharedContext`] and nothing else.
//!
//! The fieldbus master itself lives behind [`axon_common::bus::BusLayer`];
//! this crate ships a simulated drive backend ([`bus::sim`]) for tests and
//! `--sim` runs.

pub mod bus;
pub mod config;
pub mod cycle;
pub mod error;
pub mod state;
pub mod supervisor;
