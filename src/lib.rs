//! Hosts externally compiled shader effects inside a compositor's native
//! plugin object model.
//!
//! The crate exposes reference-counted, capability-queryable native objects
//! ([`mapper::TransformMapper`], [`texture::ResourceTextureManager`], the
//! effect state created by the registered factory), the fixed property table
//! the host drives them through, and registration either directly with an
//! [`effects::EffectHost`] or through the versioned blob in
//! [`effect_bridge_core::blob`].

pub mod effects;
mod error;
pub mod mapper;
pub mod native;
pub mod texture;

#[cfg(all(windows, feature = "direct2d"))]
pub mod d2d;

pub use effect_bridge_core::{BlobError, GUID, RegistrationBlob, blob};
pub use error::{EffectError, Result};
