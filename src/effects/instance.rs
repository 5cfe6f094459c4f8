//! Effect instance creation and management.

use std::marker::PhantomData;

use windows_core::Interface;

use super::host::{EffectHost, HostEffect};
use super::traits::{ConstantBuffer, ShaderEffect};
use crate::error::{EffectError, Result};
use crate::mapper::TransformMapper;
use crate::texture::ResourceTextureManager;

/// A created instance of a registered effect.
///
/// The effect must have been registered via [`super::EffectRegistry::register`]
/// before creating instances.
///
/// # Example
///
/// ```ignore
/// let instance = EffectInstance::<MyEffect, _>::create(&host)?;
/// instance.update(&MyEffect { intensity: 0.5 })?;
/// instance.set_resource_texture_manager(0, Some(&lut))?;
/// ```
pub struct EffectInstance<E: ShaderEffect, H: EffectHost> {
    effect: H::Effect,
    _marker: PhantomData<fn() -> E>,
}

impl<E: ShaderEffect, H: EffectHost> EffectInstance<E, H> {
    pub fn create(host: &H) -> Result<Self> {
        let effect = host.create_effect(&E::CLSID)?;
        Ok(Self::from_raw(effect))
    }

    /// Wraps an effect the host already created for `E::CLSID`.
    pub fn from_raw(effect: H::Effect) -> Self {
        Self {
            effect,
            _marker: PhantomData,
        }
    }

    /// Writes the constant buffer for the current values of `effect_data`.
    pub fn update(&self, effect_data: &E) -> Result<()> {
        self.set_constants(&effect_data.constants())
    }

    pub fn set_constants(&self, constants: &E::Constants) -> Result<()> {
        let mut bytes = vec![0u8; E::Constants::SIZE];
        constants.write_to(&mut bytes);
        self.effect.set_value(E::KIND.constant_buffer_index(), &bytes)
    }

    pub fn constants(&self) -> Result<E::Constants> {
        let mut bytes = vec![0u8; E::Constants::SIZE];
        let written = self
            .effect
            .get_value(E::KIND.constant_buffer_index(), &mut bytes)?;
        if written != bytes.len() {
            return Err(EffectError::InvalidArgument(
                "constant buffer size does not match the effect",
            ));
        }
        Ok(E::Constants::read_from(&bytes))
    }

    /// Assigns `manager` to slot `slot` (0..16), or clears the slot.
    pub fn set_resource_texture_manager(
        &self,
        slot: u32,
        manager: Option<&ResourceTextureManager>,
    ) -> Result<()> {
        let index = E::KIND
            .resource_texture_manager_index(slot)
            .ok_or(EffectError::InvalidArgument(
                "resource texture manager slot out of range",
            ))?;
        let native = manager.map(ResourceTextureManager::native);
        self.set_interface(index, native.as_ref())
    }

    pub fn set_transform_mapper(&self, mapper: Option<&TransformMapper>) -> Result<()> {
        let native = mapper.map(TransformMapper::native);
        self.set_interface(E::KIND.transform_mapper_index(), native.as_ref())
    }

    fn set_interface<I: Interface>(&self, index: u32, value: Option<&I>) -> Result<()> {
        let address = value.map_or(0, |value| value.as_raw() as usize);
        self.effect.set_value(index, &address.to_ne_bytes())
    }

    /// Returns a reference to the underlying host effect.
    pub fn as_raw(&self) -> &H::Effect {
        &self.effect
    }

    /// Consumes the wrapper and returns the underlying host effect.
    pub fn into_raw(self) -> H::Effect {
        self.effect
    }
}

impl<E: ShaderEffect, H: EffectHost> Clone for EffectInstance<E, H>
where
    H::Effect: Clone,
{
    fn clone(&self) -> Self {
        Self::from_raw(self.effect.clone())
    }
}

impl<E: ShaderEffect, H: EffectHost> AsRef<H::Effect> for EffectInstance<E, H> {
    fn as_ref(&self) -> &H::Effect {
        &self.effect
    }
}
