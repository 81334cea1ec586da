//! Trust core of an exposure notification backend: upload validation, key
//! insertion with federation bookkeeping, and signed responses.

// Canonical UTC instant and rolling-period arithmetic
pub mod time;

// Exposure keys as uploaded and as exchanged between backends
pub mod model;

// Upload request validation
pub mod validation;

// Modifier/filter pipeline and federation sync log
pub mod insertion;

// Response digests, signatures and the key vault
pub mod signing;

// Environment driven server settings
pub mod settings;

// HTTP handlers
pub mod modules;
