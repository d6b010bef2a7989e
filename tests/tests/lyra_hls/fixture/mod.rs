//! Test fixtures for HLS integration tests
//!
//! - a local HLS server whose content can change while a session runs
//! - playlist and segment builders
//! - AES-128 encryption of segment bodies
//! - a pull loop that plays a session the way a host would

pub(crate) mod crypto;
pub(crate) mod media;
pub(crate) mod player;
pub(crate) mod server;

pub(crate) use crypto::*;
pub(crate) use media::*;
pub(crate) use player::*;
pub(crate) use server::*;
