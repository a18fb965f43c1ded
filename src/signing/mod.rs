//! Rendering, signing, storing and recording documents.
pub mod artifact;
pub mod batch;
pub mod orchestrator;
pub mod progress;
pub mod render;
pub mod verify;
