//! Platform-neutral building blocks shared by every consumer of the effect
//! registration format.
//!
//! This crate has no dependency on any graphics API, so a loader living in a
//! separately compiled module can decode a registration blob produced by
//! `effect-bridge` without sharing anything but this wire format.

pub mod blob;

pub use blob::{BLOB_VERSION_ID, BindingRecord, BlobError, MIN_BLOB_SIZE, RegistrationBlob};
pub use windows_core::GUID;
