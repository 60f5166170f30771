//! Adaptive feed scheduler.
//!
//! - [`mode`]: tap-failure detection, voice-assist fallback, sundowning and ambient light
//! - [`policy`]: novelty-weighted selection, session state, engagement and cooldown rules
//! - [`recall`]: "do you remember?" prompt timing and responses
//! - [`narration`]: narration generation seam and HTTP client
//! - [`backend`]: storage seams and the SQLite adapter
//! - [`persist`]: ordered background writes with bounded retry
//! - [`controller`]: the session composition root

pub mod backend;
pub mod controller;
pub mod mode;
pub mod narration;
pub mod persist;
pub mod policy;
pub mod recall;

pub use controller::{FeedController, FeedEvent, FeedSettings, VoiceOutcome};
