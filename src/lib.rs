//! Kindroid - interaction runtime for a conversational robot
//!
//! This library drives one conversation at a time between a visitor and the
//! robot:
//! - Identity resolution (scanned code or a fixed fallback)
//! - Speech I/O (console, or microphone/speaker with STT/TTS)
//! - Output devices (receipt printer, facial expressions)
//! - Dialogue backend (HTTP service, or a local stub in test mode)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Supervisor                        │
//! │   Restart loop  │  Identity deadline  │  Shutdown    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   Flow engine                        │
//! │   Identity → Greeting → Input → Reply → Ending      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Adapters                          │
//! │  Resolver  │  Speech  │  Backend  │  Printer │ Face │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod directive;
pub mod error;
pub mod flow;
pub mod identity;
pub mod output;
pub mod session;
pub mod supervisor;
pub mod voice;

pub use config::Config;
pub use error::{AdapterError, Error, Result};
