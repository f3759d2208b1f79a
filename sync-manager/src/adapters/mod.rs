//! Built-in provider adapters.
//!
//! - [`ring::RingAdapter`] and [`band::BandAdapter`] talk to provider REST APIs.
//! - [`fixture::FixtureAdapter`] serves fixed or date-derived payloads for any
//!   provider (demo mode and tests).

pub mod band;
pub mod fixture;
mod http;
pub mod ring;
