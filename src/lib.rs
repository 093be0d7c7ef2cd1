//! slircbot - Straylight IRC bot runtime.
//!
//! Keeps connections to one or more IRC networks alive, turns what the
//! servers say into events and hands them to plugins in priority order.
//! Everything runs cooperatively on a single thread, driven by
//! [`runtime::Bot::tick`].
//!
//! ```no_run
//! use slircbot::config::Config;
//! use slircbot::plugins::Catalog;
//! use slircbot::runtime::Bot;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::load("slircbot.toml")?;
//! let bot = Bot::new(config, Catalog::new())?;
//! bot.run().await;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod network;
pub mod plugins;
pub mod runtime;
pub mod scheduler;
pub mod security;
pub mod supervisor;
pub mod telemetry;

pub use slircbot_proto as proto;
