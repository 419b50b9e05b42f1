//! # UI Module
//!
//! Terminal rendering for live sessions.

pub mod hud;
