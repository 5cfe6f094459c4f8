//! Resource textures: N-dimensional lookup data for effect shaders.
//!
//! A [`ResourceTextureManager`] can be created and filled before any render
//! context exists. Its descriptor and data are buffered until an effect that
//! holds the manager is bound to an [`EffectContext`], at which point the real
//! texture is created and the buffer is dropped.

mod manager;
mod region;

use std::sync::Arc;

pub use manager::{
    IResourceTextureManager, IResourceTextureManager_Impl, IResourceTextureManager_Vtbl,
    ResourceTextureManager, ResourceTextureProperties, create_resource_texture_manager,
};
pub(crate) use manager::{bind_manager_context, is_bindable, manager_resource_texture};

use windows_core::{GUID, HRESULT, IUnknown};

use crate::error::{EffectError, Result};
use crate::native::E_INVALIDARG;

/// Host surface that can create resource textures for one device context.
pub trait EffectContext: Send + Sync {
    fn create_resource_texture(
        &self,
        resource_id: Option<&GUID>,
        descriptor: &ResourceTextureDescriptor,
    ) -> Result<Arc<dyn ResourceTexture>>;
}

/// A materialized texture owned by the host.
pub trait ResourceTexture: Send + Sync {
    /// Writes `data` into the region `[minimum_extents, maximum_extents)`, or
    /// into the whole texture when either bound is `None`.
    fn update(
        &self,
        minimum_extents: Option<&[u32]>,
        maximum_extents: Option<&[u32]>,
        strides: &[u32],
        data: &[u8],
    ) -> Result<()>;

    /// The host object behind this texture, for hosts that bind it natively.
    fn native(&self) -> Option<IUnknown> {
        None
    }
}

macro_rules! native_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident = $value:expr),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[repr(u32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant = $value),+
        }

        impl TryFrom<u32> for $name {
            type Error = HRESULT;

            fn try_from(value: u32) -> std::result::Result<Self, HRESULT> {
                match value {
                    $(v if v == $value => Ok($name::$variant),)+
                    _ => Err(E_INVALIDARG),
                }
            }
        }
    };
}

native_enum! {
    /// Storage format of each channel.
    pub enum BufferPrecision {
        Unknown = 0,
        UInt8Normalized = 1,
        UInt8NormalizedSrgb = 2,
        UInt16Normalized = 3,
        Float16 = 4,
        Float32 = 5,
    }
}

native_enum! {
    pub enum ChannelDepth {
        Default = 0,
        One = 1,
        Four = 4,
    }
}

native_enum! {
    pub enum Filter {
        MinMagMipPoint = 0x00,
        MinMagPointMipLinear = 0x01,
        MinPointMagLinearMipPoint = 0x04,
        MinPointMagMipLinear = 0x05,
        MinLinearMagMipPoint = 0x10,
        MinLinearMagPointMipLinear = 0x11,
        MinMagLinearMipPoint = 0x14,
        MinMagMipLinear = 0x15,
        Anisotropic = 0x55,
    }
}

native_enum! {
    /// Addressing outside `[0, extent)` along one dimension.
    pub enum ExtendMode {
        Clamp = 0,
        Wrap = 1,
        Mirror = 2,
    }
}

impl BufferPrecision {
    pub const fn bytes_per_channel(self) -> Option<usize> {
        match self {
            BufferPrecision::Unknown => None,
            BufferPrecision::UInt8Normalized | BufferPrecision::UInt8NormalizedSrgb => Some(1),
            BufferPrecision::UInt16Normalized | BufferPrecision::Float16 => Some(2),
            BufferPrecision::Float32 => Some(4),
        }
    }
}

impl ChannelDepth {
    pub const fn channel_count(self) -> usize {
        match self {
            ChannelDepth::One => 1,
            ChannelDepth::Default | ChannelDepth::Four => 4,
        }
    }
}

pub const MAX_DIMENSIONS: usize = 3;

/// Shape, sampling state and optional initial contents of a resource texture.
///
/// `strides[i]` is the byte distance between consecutive indices of
/// dimension `i + 1` in `data`; dimension 0 is contiguous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTextureDescriptor {
    pub extents: Vec<u32>,
    pub buffer_precision: BufferPrecision,
    pub channel_depth: ChannelDepth,
    pub filter: Filter,
    pub extend_modes: Vec<ExtendMode>,
    pub data: Vec<u8>,
    pub strides: Vec<u32>,
}

impl ResourceTextureDescriptor {
    /// 8-bit, four channel, linearly filtered texture with no initial data.
    pub fn new(extents: Vec<u32>, extend_modes: Vec<ExtendMode>) -> Self {
        Self {
            extents,
            buffer_precision: BufferPrecision::UInt8Normalized,
            channel_depth: ChannelDepth::Four,
            filter: Filter::MinMagMipLinear,
            extend_modes,
            data: Vec::new(),
            strides: Vec::new(),
        }
    }

    pub fn with_format(mut self, precision: BufferPrecision, depth: ChannelDepth) -> Self {
        self.buffer_precision = precision;
        self.channel_depth = depth;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_data(mut self, data: Vec<u8>, strides: Vec<u32>) -> Self {
        self.data = data;
        self.strides = strides;
        self
    }

    pub fn dimensions(&self) -> usize {
        self.extents.len()
    }

    /// Bytes per texel, `None` for an unknown precision.
    pub fn element_size(&self) -> Option<usize> {
        self.buffer_precision
            .bytes_per_channel()
            .map(|bytes| bytes * self.channel_depth.channel_count())
    }

    /// Checks every shape invariant. Nothing may reach the native layer
    /// before this passes.
    pub fn validate(&self) -> Result<()> {
        if self.extents.is_empty() {
            return Err(EffectError::InvalidArgument("extents must not be empty"));
        }
        if self.extents.len() > MAX_DIMENSIONS {
            return Err(EffectError::InvalidArgument(
                "resource textures have at most three dimensions",
            ));
        }
        if self.extents.contains(&0) {
            return Err(EffectError::InvalidArgument("extents must be non-zero"));
        }
        if self.extend_modes.len() != self.extents.len() {
            return Err(EffectError::InvalidArgument(
                "extend modes must have one entry per dimension",
            ));
        }
        let element_size = self
            .element_size()
            .ok_or(EffectError::InvalidArgument("buffer precision must be known"))?;

        if !self.data.is_empty() {
            if self.strides.len() != self.extents.len() - 1 {
                return Err(EffectError::InvalidArgument(
                    "strides must have one entry per dimension after the first",
                ));
            }
            let required = region::required_len(&self.extents, &self.strides, element_size)
                .map_err(EffectError::InvalidArgument)?;
            if self.data.len() < required {
                return Err(EffectError::InvalidArgument(
                    "data does not cover the extents",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(extents: Vec<u32>, modes: Vec<ExtendMode>) -> ResourceTextureDescriptor {
        ResourceTextureDescriptor::new(extents, modes)
            .with_format(BufferPrecision::UInt8Normalized, ChannelDepth::One)
    }

    #[test]
    fn test_empty_extents() {
        assert!(matches!(
            bytes(vec![], vec![]).validate(),
            Err(EffectError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_extend_modes_mismatch() {
        assert!(matches!(
            bytes(vec![4, 4], vec![ExtendMode::Clamp]).validate(),
            Err(EffectError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_data_needs_strides() {
        let descriptor = bytes(vec![4, 4], vec![ExtendMode::Clamp, ExtendMode::Clamp])
            .with_data(vec![0; 16], vec![]);
        assert!(matches!(
            descriptor.validate(),
            Err(EffectError::InvalidArgument(_))
        ));

        let descriptor = bytes(vec![4, 4], vec![ExtendMode::Clamp, ExtendMode::Clamp])
            .with_data(vec![0; 16], vec![4]);
        assert_eq!(descriptor.validate(), Ok(()));
    }

    #[test]
    fn test_data_must_cover_extents() {
        let descriptor = bytes(vec![4, 4], vec![ExtendMode::Clamp, ExtendMode::Clamp])
            .with_data(vec![0; 15], vec![4]);
        assert!(descriptor.validate().is_err());

        let descriptor = bytes(vec![4, 4], vec![ExtendMode::Clamp, ExtendMode::Clamp])
            .with_data(vec![0; 16], vec![3]);
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn test_shape_limits() {
        let modes = vec![ExtendMode::Wrap; 4];
        assert!(bytes(vec![2, 2, 2, 2], modes).validate().is_err());
        assert!(
            bytes(vec![2, 0], vec![ExtendMode::Wrap, ExtendMode::Wrap])
                .validate()
                .is_err()
        );
        let unknown = ResourceTextureDescriptor::new(vec![2], vec![ExtendMode::Mirror])
            .with_format(BufferPrecision::Unknown, ChannelDepth::Four);
        assert!(unknown.validate().is_err());
    }

    #[test]
    fn test_no_data_needs_no_strides() {
        let descriptor = ResourceTextureDescriptor::new(
            vec![8, 8, 8],
            vec![ExtendMode::Clamp, ExtendMode::Wrap, ExtendMode::Mirror],
        );
        assert_eq!(descriptor.validate(), Ok(()));
        assert_eq!(descriptor.element_size(), Some(4));
    }

    #[test]
    fn test_native_enum_conversion() {
        assert_eq!(ExtendMode::try_from(2), Ok(ExtendMode::Mirror));
        assert_eq!(Filter::try_from(0x55), Ok(Filter::Anisotropic));
        assert_eq!(ChannelDepth::try_from(2), Err(E_INVALIDARG));
        assert_eq!(BufferPrecision::Float32 as u32, 5);
    }
}
