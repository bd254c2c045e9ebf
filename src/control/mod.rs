//! Developer tooling layered on [`AudioCore`](crate::AudioCore).

/// Ratatui-based cue console.
pub mod ui;
