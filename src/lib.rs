//! Client-side parsing of Plex Media Server responses.
//!
//! `plexer` fetches navigation listings and device descriptors from a
//! Plex Media Server and turns them into typed records:
//!
//! * [`target`] builds the request target and resolves resource URLs
//! * [`http`] fetches responses through a rate-limited client
//! * [`protocol`] decodes markup or binary property lists and extracts
//!   media entries and device records
//! * [`normalize`] deduplicates and validates what was extracted
//! * [`parser`] ties the above together
//!
//! Malformed siblings never fail a listing: they are skipped and counted,
//! see [`normalize::Listing`].
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod http;
pub mod normalize;
pub mod parser;
pub mod protocol;
pub mod target;
pub mod token;

pub use error::{Error, ErrorKind, Result};
pub use normalize::Listing;
pub use parser::{parse_device_info, parse_navigation_response, Parser};
