//! Trait definitions for custom shader effects.

use super::state::EffectFactoryFn;
#[cfg(not(all(windows, feature = "direct2d")))]
use super::state::create_effect_state;
use windows_core::GUID;

/// Metadata describing a custom effect for registration with the host.
#[derive(Debug, Clone)]
pub struct EffectMetadata {
    /// Human-readable name of the effect
    pub name: &'static str,
    /// Author of the effect
    pub author: &'static str,
    /// Category for organization (e.g., "Color", "Blur", "Distortion")
    pub category: &'static str,
    /// Description of what the effect does
    pub description: &'static str,
}

/// Value types of the properties every effect registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    String,
    Blob,
    IUnknown,
}

impl PropertyType {
    /// Returns the XML type string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Blob => "blob",
            PropertyType::IUnknown => "iunknown",
        }
    }
}

/// How the effect's shader runs. Both kinds expose the same property
/// numbering; see [`super::properties`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    PixelShader,
    ComputeShader,
}

/// Byte serialization of an effect's constant buffer.
///
/// Implemented for every `bytemuck::Pod` type, which covers `#[repr(C)]`
/// structs of scalars and vectors laid out the way the shader expects.
pub trait ConstantBuffer {
    /// Size of the serialized buffer in bytes.
    const SIZE: usize;

    /// Writes exactly `SIZE` bytes into `out`.
    fn write_to(&self, out: &mut [u8]);

    /// Reads a value back from exactly `SIZE` bytes.
    fn read_from(bytes: &[u8]) -> Self
    where
        Self: Sized;
}

impl<T: bytemuck::Pod> ConstantBuffer for T {
    const SIZE: usize = std::mem::size_of::<T>();

    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(bytemuck::bytes_of(self));
    }

    fn read_from(bytes: &[u8]) -> Self {
        bytemuck::pod_read_unaligned(bytes)
    }
}

/// Object-safe view of a [`ShaderEffect`], automatically implemented.
pub trait DynShaderEffect: Send + Sync {
    /// Returns the CLSID for this effect.
    fn clsid(&self) -> GUID;

    /// Returns the serialized constant buffer for the current values.
    fn constant_buffer(&self) -> Vec<u8>;
}

/// Trait for defining custom shader effects.
///
/// # Example
///
/// ```ignore
/// #[repr(C)]
/// #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
/// pub struct SepiaConstants {
///     pub intensity: f32,
///     pub _pad: [f32; 3],
/// }
///
/// pub struct SepiaEffect {
///     pub intensity: f32,
/// }
///
/// impl ShaderEffect for SepiaEffect {
///     const CLSID: GUID = GUID::from_u128(0x12345678_1234_1234_1234_123456789abc);
///     type Constants = SepiaConstants;
///
///     fn metadata() -> EffectMetadata {
///         EffectMetadata {
///             name: "SepiaEffect",
///             author: "effect-bridge",
///             category: "Color",
///             description: "Applies sepia tone to an image",
///         }
///     }
///
///     fn shader_bytecode() -> &'static [u8] {
///         include_bytes!("shaders/sepia.cso")
///     }
///
///     fn constants(&self) -> SepiaConstants {
///         SepiaConstants { intensity: self.intensity, _pad: [0.0; 3] }
///     }
/// }
/// ```
pub trait ShaderEffect: Send + Sync + 'static {
    /// Unique identifier (CLSID) for this effect type.
    /// Must be globally unique - use a GUID generator to create this.
    const CLSID: GUID;

    /// Number of input images this effect accepts.
    const INPUT_COUNT: u32 = 1;

    const KIND: EffectKind = EffectKind::PixelShader;

    /// Layout of the shader's constant buffer.
    type Constants: ConstantBuffer;

    /// Returns metadata describing this effect for registration.
    fn metadata() -> EffectMetadata
    where
        Self: Sized;

    /// Compiled shader bytecode, produced by an external compiler step.
    fn shader_bytecode() -> &'static [u8]
    where
        Self: Sized;

    /// Returns the constant buffer for the current property values.
    fn constants(&self) -> Self::Constants;

    /// Factory registered for this effect. The returned object must answer
    /// [`super::IEffectStateSource`]. With Direct2D available the default is
    /// a full Direct2D effect; otherwise it creates a bare
    /// [`super::EffectState`].
    fn effect_factory() -> EffectFactoryFn
    where
        Self: Sized,
    {
        #[cfg(all(windows, feature = "direct2d"))]
        {
            crate::d2d::create_direct2d_effect::<Self>
        }
        #[cfg(not(all(windows, feature = "direct2d")))]
        {
            create_effect_state::<Self>
        }
    }
}

impl<T: ShaderEffect> DynShaderEffect for T {
    fn clsid(&self) -> GUID {
        T::CLSID
    }

    fn constant_buffer(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; T::Constants::SIZE];
        self.constants().write_to(&mut bytes);
        bytes
    }
}
