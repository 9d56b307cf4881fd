//! Palette Studio
//!
//! Dominant-color palettes from creature artwork:
//! - `color`: color math and format conversion
//! - `palette`: image color extraction
//! - `state`: the saved palette library and its storage backends
//! - `remote`: cached, coalesced remote lookups
//! - `studio`: wiring from subject name to saved palette

pub mod clock;
pub mod color;
pub mod config;
pub mod logging;
pub mod palette;
pub mod remote;
pub mod state;
pub mod studio;
