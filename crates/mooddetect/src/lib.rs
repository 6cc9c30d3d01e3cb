//! Camera-driven mood detection with exclusive multi-track playback.
//!
//! A [`SessionOrchestrator`] ties together a camera ([`capture`]), an
//! expression model ([`inference`]), mood resolution ([`mood`]), the
//! recommendation backend ([`tracks`]) and a [`playback`] pool in which at
//! most one track plays at a time.

pub mod capture;
pub mod error;
pub mod inference;
pub mod mood;
pub mod playback;
pub mod present;
pub mod session;
pub mod telemetry;
pub mod tracks;
pub mod types;

pub use error::SessionError;
pub use mood::Mood;
pub use session::{SessionEvent, SessionOrchestrator, SessionSettings, SessionSnapshot, SessionState};
pub use types::{ExpressionScoreSet, Frame, FrameDimensions, TrackDescriptor, TrackId};
