//! Live audio fan-out for ICY/Shoutcast style listeners.
//!
//! Data Flow:
//! ```text
//!                                               ┌─► ClientSession ─► Encoder ─► IcyFramer? ─► socket
//!                                               │
//! AudioSource ─► Switchboard ─► BroadcastTap ───┼─► ClientSession ─► Encoder ─► IcyFramer? ─► socket
//!                                               │
//!                                               └─► ...
//! ```
//!
//! The switchboard owns the single active source and may swap it at any time.
//! The tap never waits on clients: a client that falls behind loses its oldest
//! queued chunks. Every client owns its encoder, so one client's encoder
//! fault or disconnect tears down that client only.

pub mod bus;
pub mod encoder;
pub mod error;
pub mod icy;
pub mod input;
pub mod metadata;
pub mod session;
pub mod switchboard;
pub mod tap;

pub use bus::{BusConfig, CastBus};
pub use encoder::{
    Encoder, EncoderError, EncoderFactory, LameEncoderFactory, PassthroughEncoderFactory,
    PcmFormat,
};
pub use error::{CastError, Result};
pub use icy::ICY_METAINT;
pub use input::AudioSource;
pub use metadata::MetadataRegister;
pub use session::{ClientStream, CloseReason, SessionState};
