//! Message surface exposed to the extension scripts.
//!
//! Versioned modules (currently `v1`) group the recognised actions so the
//! message format can evolve without breaking older content scripts.

pub mod v1;
