//! Wire models for the REST API built into Elgato-style keylights.
//!
//! The device API is fixed: every light listens on port 9123 and exposes
//! `/elgato/lights` and `/elgato/accessory-info`.

pub mod models;
pub mod restful;

pub use models::*;
pub use restful::*;
