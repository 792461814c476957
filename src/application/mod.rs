//! Application layer - Port definitions.
//!
//! Contracts toward external collaborators. The core never talks to the
//! auth stack or client storage directly; it goes through these ports.

/// Collaborator port traits (Auth, Storage).
pub mod ports;
