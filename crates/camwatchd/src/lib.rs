//! camwatchd library - exposes modules for testing.

pub mod buzzer;
pub mod camera;
pub mod config;
pub mod controller;
pub mod error;
pub mod gpio;
pub mod led;
pub mod logging;
pub mod motion;
pub mod pipeline;
pub mod router;
pub mod state;
pub mod transport;
