//! Device collaborators.
//!
//! A headless node has no camera, compass, speaker or scene.  This module
//! provides stand-ins:
//!
//! - [`simulated`] – used by the `presence-node` binary.  The tracker walks a
//!   slow circle so peers see movement; audio and presences log through
//!   `tracing`.
//! - [`mock`] – recording implementations for tests.  Every call lands in a
//!   `Mutex<Vec<...>>` that assertions can inspect.

pub mod mock;
pub mod simulated;

pub use simulated::{LoggingAudio, LoggingPresenceFactory, NoRotationSensor, SimulatedTracker};
