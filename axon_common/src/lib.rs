//! Axon common library
//!
//! Shared, allocation-free leaf types for the axon single-axis servo
//! controller:
//!
//! - [`cia402`] - CiA 402 status/control word vocabulary and state derivation
//! - [`pdo`] - Fixed-layout cyclic process-data records
//! - [`units`] - Encoder-count / degree scaling
//! - [`bus`] - Fieldbus collaborator trait and error type
//! - [`shared`] - Lock-free status/command channel between the cyclic loop
//!   and the supervisor

pub mod bus;
pub mod cia402;
pub mod pdo;
pub mod shared;
pub mod units;
