//! Keeps a host informed of the true playback state of a Connect device.
//!
//! The [`engine`] reconciles push notifications from a playback client with
//! periodic samples of the same client, so that changes made from other
//! devices are reported as reliably as changes made through the engine
//! itself. The host talks to the engine through a [`Handle`](engine::Handle)
//! and receives [`Message`](bridge::Message)s through a
//! [`Bridge`](bridge::Bridge).
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod bridge;
pub mod client;
pub mod command;
pub mod config;
pub mod connect;
pub mod credential;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod events;
pub mod gate;
pub mod http;
pub mod normalize;
pub mod poller;
pub mod remote;
pub mod session;
pub mod signal;
pub mod state;
pub mod throttle;
pub mod util;

#[cfg(test)]
mod fake;
