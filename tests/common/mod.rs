#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytemuck::{Pod, Zeroable};
use effect_bridge::effects::{
    EffectFactoryFn, EffectHost, EffectKind, EffectMetadata, HostEffect, PropertyBinding,
    ShaderEffect,
};
use effect_bridge::native::{E_INVALIDARG, E_POINTER};
use effect_bridge::texture::{EffectContext, ResourceTexture, ResourceTextureDescriptor};
use effect_bridge::{EffectError, Result};
use windows_core::{GUID, IUnknown, Interface, OutRef};

pub struct Registered {
    pub property_xml: String,
    pub bindings: Vec<PropertyBinding>,
    pub factory: EffectFactoryFn,
}

/// Host that keeps registrations in a map and drives effects through the
/// registered binding table, the way a compositor would.
#[derive(Default)]
pub struct InMemoryHost {
    pub registered: Mutex<HashMap<GUID, Registered>>,
    pub registrations: Mutex<usize>,
}

impl InMemoryHost {
    pub fn property_xml(&self, class_id: &GUID) -> Option<String> {
        self.registered
            .lock()
            .unwrap()
            .get(class_id)
            .map(|r| r.property_xml.clone())
    }

    pub fn registration_count(&self) -> usize {
        *self.registrations.lock().unwrap()
    }
}

impl EffectHost for InMemoryHost {
    type Effect = InMemoryEffect;

    fn register_effect_from_string(
        &self,
        class_id: &GUID,
        property_xml: &str,
        bindings: &[PropertyBinding],
        factory: EffectFactoryFn,
    ) -> Result<()> {
        self.registered.lock().unwrap().insert(
            *class_id,
            Registered {
                property_xml: property_xml.to_owned(),
                bindings: bindings.to_vec(),
                factory,
            },
        );
        *self.registrations.lock().unwrap() += 1;
        Ok(())
    }

    fn unregister_effect(&self, class_id: &GUID) -> Result<()> {
        self.registered
            .lock()
            .unwrap()
            .remove(class_id)
            .map(|_| ())
            .ok_or(EffectError::Host(E_INVALIDARG))
    }

    fn create_effect(&self, class_id: &GUID) -> Result<InMemoryEffect> {
        let registered = self.registered.lock().unwrap();
        let registration = registered
            .get(class_id)
            .ok_or(EffectError::Host(E_INVALIDARG))?;
        let mut native = None;
        unsafe { (registration.factory)(OutRef::from(&mut native)) }.ok()?;
        let native = native.ok_or(EffectError::Host(E_POINTER))?;
        Ok(InMemoryEffect {
            native,
            bindings: registration.bindings.clone(),
        })
    }
}

#[derive(Clone)]
pub struct InMemoryEffect {
    pub native: IUnknown,
    bindings: Vec<PropertyBinding>,
}

impl HostEffect for InMemoryEffect {
    fn set_value(&self, index: u32, data: &[u8]) -> Result<()> {
        let setter = self
            .bindings
            .get(index as usize)
            .and_then(|binding| binding.setter)
            .ok_or(EffectError::Host(E_INVALIDARG))?;
        unsafe { setter(self.native.as_raw(), data.as_ptr(), data.len() as u32) }.ok()?;
        Ok(())
    }

    fn get_value(&self, index: u32, data: &mut [u8]) -> Result<usize> {
        let getter = self
            .bindings
            .get(index as usize)
            .and_then(|binding| binding.getter)
            .ok_or(EffectError::Host(E_INVALIDARG))?;
        let mut actual = 0;
        unsafe {
            getter(
                self.native.as_raw(),
                data.as_mut_ptr(),
                data.len() as u32,
                &mut actual,
            )
        }
        .ok()?;
        Ok(actual as usize)
    }
}

#[derive(Default)]
pub struct RecordingTexture {
    pub updates: Mutex<Vec<Vec<u8>>>,
}

impl ResourceTexture for RecordingTexture {
    fn update(
        &self,
        _minimum_extents: Option<&[u32]>,
        _maximum_extents: Option<&[u32]>,
        _strides: &[u32],
        data: &[u8],
    ) -> Result<()> {
        self.updates.lock().unwrap().push(data.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingContext {
    pub created: Mutex<Vec<ResourceTextureDescriptor>>,
}

impl EffectContext for RecordingContext {
    fn create_resource_texture(
        &self,
        _resource_id: Option<&GUID>,
        descriptor: &ResourceTextureDescriptor,
    ) -> Result<Arc<dyn ResourceTexture>> {
        self.created.lock().unwrap().push(descriptor.clone());
        Ok(Arc::new(RecordingTexture::default()))
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlendConstants {
    pub amount: f32,
    pub mode: u32,
    pub _pad: [u32; 2],
}

/// Two-input pixel shader effect.
pub struct Blend {
    pub amount: f32,
    pub mode: u32,
}

impl ShaderEffect for Blend {
    const CLSID: GUID = GUID::from_u128(0x3F1B0E52_7C44_4E8A_A6D3_51C2E0B94F10);
    const INPUT_COUNT: u32 = 2;
    type Constants = BlendConstants;

    fn metadata() -> EffectMetadata {
        EffectMetadata {
            name: "Blend",
            author: "effect-bridge",
            category: "Composition",
            description: "Blends two inputs",
        }
    }

    fn shader_bytecode() -> &'static [u8] {
        &[0x44, 0x58, 0x42, 0x43, 0, 0, 0, 0]
    }

    fn constants(&self) -> BlendConstants {
        BlendConstants {
            amount: self.amount,
            mode: self.mode,
            _pad: [0; 2],
        }
    }
}

/// Zero-input compute shader effect.
pub struct Noise {
    pub seed: u32,
}

impl ShaderEffect for Noise {
    const CLSID: GUID = GUID::from_u128(0x8D20C6A7_0B9F_4C3E_9E61_F45A7B2D0C88);
    const INPUT_COUNT: u32 = 0;
    const KIND: EffectKind = EffectKind::ComputeShader;
    type Constants = u32;

    fn metadata() -> EffectMetadata {
        EffectMetadata {
            name: "Noise",
            author: "effect-bridge",
            category: "Source",
            description: "Generates value noise",
        }
    }

    fn shader_bytecode() -> &'static [u8] {
        &[0x44, 0x58, 0x42, 0x43]
    }

    fn constants(&self) -> u32 {
        self.seed
    }
}
