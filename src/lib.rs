//! WRM session recording replay.
//!
//! Reads the chunked WRM format written while proxying an RDP session,
//! rebuilds the drawing orders, caches, pointers and input it carries, and
//! replays them in wire order into one or more consumers.
//!
//! # Architecture
//!
//! - `wire`: little-endian cursors and screen geometry
//! - `orders`: RDP drawing order records and bitmap decompression
//! - `cache`: bitmap, pointer and glyph caches, persistent bitmap cache file
//! - `recording`: chunk framing, the order interpreter, the player, sinks
//!   and the recorder
//! - `schema`: playback configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use wrm_replay::{
//!     recording::{Consumer, OrderCounter, Player},
//!     schema::PlayerConfig,
//! };
//!
//! # fn main() -> wrm_replay::Result<()> {
//! let mut counter = OrderCounter::default();
//! let mut player = Player::open_file("session.wrm", PlayerConfig::default())?;
//! player.add_consumer(Consumer::device(&mut counter))?;
//! let stats = player.play()?;
//! println!("{}", stats);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod orders;
pub mod recording;
pub mod schema;
pub mod wire;

pub use error::{ProtocolError, ReplayError, Result};
pub use recording::{Consumer, Player, WrmRecorder};
pub use schema::PlayerConfig;
