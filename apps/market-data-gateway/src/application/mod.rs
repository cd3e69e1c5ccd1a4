//! Application layer - Use cases and port definitions.

/// Interfaces supplied by collaborators (providers, stream transport).
pub mod ports;

/// The public gateway service composing the streaming and request paths.
pub mod services;
