//! Custom shader effects.
//!
//! This module provides the pieces needed to plug an externally compiled
//! shader into a host compositor as a native effect.
//!
//! # Overview
//!
//! To create a custom effect:
//!
//! 1. Compile a shader to bytecode with an external tool
//! 2. Define a struct implementing [`ShaderEffect`]
//! 3. Register the effect with [`EffectRegistry::register`], or encode it
//!    with [`registration_blob`] for a loader that replays it through
//!    [`EffectRegistry::register_blob`]
//! 4. Create instances with [`EffectInstance::create`]
//!
//! Every effect exposes the same eighteen properties; see [`properties`].
//!
//! # Example
//!
//! ```ignore
//! #[repr(C)]
//! #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
//! pub struct GrayscaleConstants {
//!     pub intensity: f32,
//! }
//!
//! pub struct GrayscaleEffect {
//!     pub intensity: f32,
//! }
//!
//! impl ShaderEffect for GrayscaleEffect {
//!     const CLSID: GUID = GUID::from_u128(0x...);
//!     type Constants = GrayscaleConstants;
//!
//!     fn metadata() -> EffectMetadata {
//!         EffectMetadata {
//!             name: "GrayscaleEffect",
//!             author: "effect-bridge",
//!             category: "Color",
//!             description: "Converts image to grayscale",
//!         }
//!     }
//!
//!     fn shader_bytecode() -> &'static [u8] {
//!         include_bytes!("grayscale.cso")
//!     }
//!
//!     fn constants(&self) -> GrayscaleConstants {
//!         GrayscaleConstants { intensity: self.intensity }
//!     }
//! }
//!
//! // Register once at startup
//! registry.register::<GrayscaleEffect, _>(&host)?;
//!
//! // Use during rendering
//! let instance = EffectInstance::<GrayscaleEffect, _>::create(&host)?;
//! instance.update(&GrayscaleEffect { intensity: 1.0 })?;
//! ```

mod host;
mod instance;
pub mod properties;
mod registration;
mod state;
mod traits;

pub use host::{EffectHost, HostEffect};
pub use instance::EffectInstance;
pub use properties::{
    BINDING_TABLE, ComputeShaderProperty, PROPERTY_COUNT, PixelShaderProperty, PropertyBinding,
    PropertyGetFn, PropertySetFn, RESOURCE_TEXTURE_MANAGER_COUNT,
};
pub use registration::{EffectRegistration, EffectRegistry, registration_blob};
pub use state::{
    EffectFactoryFn, EffectState, IEffectStateSource, IEffectStateSource_Impl,
    IEffectStateSource_Vtbl, create_effect_state,
};
pub use traits::{
    ConstantBuffer, DynShaderEffect, EffectKind, EffectMetadata, PropertyType, ShaderEffect,
};
