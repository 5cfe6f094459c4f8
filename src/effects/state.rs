//! The per-instance effect object the host creates through the registered
//! factory.
//!
//! It stores the values behind the fixed property table: the constant
//! buffer, sixteen resource texture manager slots and the transform mapper.
//! The property getters and setters find it by asking the host's effect
//! pointer for [`IEffectStateSource`], so an effect implementation that
//! wraps an [`EffectState`] only has to implement that interface.

use std::ffi::c_void;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use windows_core::{
    ComObject, HRESULT, IUnknown, IUnknownImpl, Interface, OutRef, implement, interface,
};

use super::ShaderEffect;
use super::properties::RESOURCE_TEXTURE_MANAGER_COUNT;
use super::traits::ConstantBuffer;
use crate::error::{EffectError, Result};
use crate::mapper::{DrawInfoUpdateContext, ITransformMapper, Rect, TransformMapperRef};
use crate::native::{D2DERR_WRONG_STATE, E_NOINTERFACE, E_POINTER, GUID, S_OK, catch_native};
use crate::texture::{
    EffectContext, IResourceTextureManager, ResourceTexture, bind_manager_context, is_bindable,
    manager_resource_texture,
};

/// Answered by every effect object that carries an [`EffectState`].
#[interface("9A0E5D43-6C2B-4F17-B8E1-27D4C60F3A95")]
pub unsafe trait IEffectStateSource: windows_core::IUnknown {
    /// Stores one reference to the state object in `*state`.
    pub fn GetEffectState(&self, state: *mut *mut c_void) -> HRESULT;
}

/// Factory address handed to the host at registration. Stores one reference
/// to a new effect object in `effect_impl`.
pub type EffectFactoryFn = unsafe extern "system" fn(effect_impl: OutRef<'_, IUnknown>) -> HRESULT;

/// Factory creating a bare [`EffectState`] for `E`: a zeroed constant buffer
/// of `E::Constants::SIZE` bytes and empty slots.
///
/// # Safety
///
/// `effect_impl` must be null or valid for a pointer write.
pub unsafe extern "system" fn create_effect_state<E: ShaderEffect>(
    effect_impl: OutRef<'_, IUnknown>,
) -> HRESULT {
    catch_native("create_effect_state", || {
        let state = EffectState::new(E::CLSID, E::Constants::SIZE);
        effect_impl.write(Some(state.native()))
    })
    .into()
}

/// # Safety
///
/// `out` must be null or valid for a pointer write.
unsafe fn write_unknown(unknown: IUnknown, out: *mut *mut c_void) -> HRESULT {
    if out.is_null() {
        return E_POINTER;
    }
    unsafe { *out = unknown.into_raw() };
    S_OK
}

struct EffectProperties {
    class_id: GUID,
    constant_buffer: Vec<u8>,
    resource_texture_managers: [Option<IResourceTextureManager>; RESOURCE_TEXTURE_MANAGER_COUNT],
    transform_mapper: Option<TransformMapperRef>,
    context: Option<Arc<dyn EffectContext>>,
}

#[implement(IEffectStateSource)]
struct StateObject {
    properties: Mutex<EffectProperties>,
}

#[allow(non_snake_case)]
impl IEffectStateSource_Impl for StateObject_Impl {
    unsafe fn GetEffectState(&self, state: *mut *mut c_void) -> HRESULT {
        unsafe { write_unknown(self.to_interface(), state) }
    }
}

/// Handle to an effect object created by this crate.
#[derive(Clone)]
pub struct EffectState {
    object: ComObject<StateObject>,
}

impl EffectState {
    pub fn new(class_id: GUID, constant_buffer_size: usize) -> Self {
        let object = ComObject::new(StateObject {
            properties: Mutex::new(EffectProperties {
                class_id,
                constant_buffer: vec![0; constant_buffer_size],
                resource_texture_managers: Default::default(),
                transform_mapper: None,
                context: None,
            }),
        });
        Self { object }
    }

    /// Finds the effect state behind any object that exposes it.
    pub fn from_unknown(unknown: &IUnknown) -> Result<Self> {
        let source = unknown.cast::<IEffectStateSource>()?;
        let mut raw = std::ptr::null_mut();
        // SAFETY: `raw` is a valid out slot.
        unsafe { source.GetEffectState(&mut raw) }.ok()?;
        if raw.is_null() {
            return Err(EffectError::Host(E_POINTER));
        }
        // SAFETY: a successful call transfers one reference.
        let state = unsafe { IUnknown::from_raw(raw) };
        Ok(Self {
            object: state.cast_object::<StateObject>()?,
        })
    }

    /// Same as [`EffectState::from_unknown`] for a borrowed host pointer.
    ///
    /// # Safety
    ///
    /// `effect` must be null or a live COM object.
    pub(crate) unsafe fn from_effect_ptr(effect: *mut c_void) -> windows_core::Result<Self> {
        let unknown = unsafe { IUnknown::from_raw_borrowed(&effect) }.ok_or(E_POINTER)?;
        Ok(Self::from_unknown(unknown)?)
    }

    /// A counted `IUnknown` on the state object.
    pub fn native(&self) -> IUnknown {
        self.object.to_interface()
    }

    /// Implements [`IEffectStateSource::GetEffectState`] for objects that
    /// wrap this state.
    ///
    /// # Safety
    ///
    /// `out` must be null or valid for a pointer write.
    pub unsafe fn write_native(&self, out: *mut *mut c_void) -> HRESULT {
        unsafe { write_unknown(self.native(), out) }
    }

    fn lock(&self) -> MutexGuard<'_, EffectProperties> {
        // Every update replaces whole fields, so a poisoned value is still consistent.
        self.object
            .properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn class_id(&self) -> GUID {
        self.lock().class_id
    }

    pub fn constant_buffer(&self) -> Vec<u8> {
        self.lock().constant_buffer.clone()
    }

    pub fn constant_buffer_size(&self) -> usize {
        self.lock().constant_buffer.len()
    }

    /// Replaces the constant buffer. The size is fixed at creation.
    pub fn set_constant_buffer(&self, bytes: &[u8]) -> Result<()> {
        let mut properties = self.lock();
        if bytes.len() != properties.constant_buffer.len() {
            return Err(EffectError::InvalidArgument(
                "constant buffer size does not match the effect",
            ));
        }
        properties.constant_buffer.copy_from_slice(bytes);
        Ok(())
    }

    pub fn constants<T: ConstantBuffer>(&self) -> Result<T> {
        let properties = self.lock();
        if T::SIZE != properties.constant_buffer.len() {
            return Err(EffectError::InvalidArgument(
                "constant buffer size does not match the effect",
            ));
        }
        Ok(T::read_from(&properties.constant_buffer))
    }

    fn check_slot(slot: usize) -> Result<()> {
        if slot >= RESOURCE_TEXTURE_MANAGER_COUNT {
            return Err(EffectError::InvalidArgument(
                "resource texture manager slot out of range",
            ));
        }
        Ok(())
    }

    pub fn resource_texture_manager(&self, slot: usize) -> Result<Option<IResourceTextureManager>> {
        Self::check_slot(slot)?;
        Ok(self.lock().resource_texture_managers[slot].clone())
    }

    /// Stores `manager` in `slot`, or clears it. When a context is already
    /// bound the manager is bound to it before it is stored.
    pub fn set_resource_texture_manager(
        &self,
        slot: usize,
        manager: Option<&IResourceTextureManager>,
    ) -> Result<()> {
        Self::check_slot(slot)?;
        if let Some(manager) = manager {
            if !is_bindable(manager) {
                return Err(EffectError::Host(E_NOINTERFACE));
            }
        }

        let context = self.lock().context.clone();
        if let (Some(manager), Some(context)) = (manager, &context) {
            bind_manager_context(manager, context)?;
        }
        self.lock().resource_texture_managers[slot] = manager.cloned();
        Ok(())
    }

    pub fn transform_mapper(&self) -> Option<TransformMapperRef> {
        self.lock().transform_mapper.clone()
    }

    pub fn set_transform_mapper(&self, mapper: Option<&ITransformMapper>) -> Result<()> {
        self.lock().transform_mapper = mapper.cloned().map(TransformMapperRef::new);
        Ok(())
    }

    pub fn context(&self) -> Option<Arc<dyn EffectContext>> {
        self.lock().context.clone()
    }

    /// Binds the effect to the host context it renders with, materializing
    /// every resource texture manager already assigned. Binding the same
    /// context again is a no-op.
    pub fn bind_context(&self, context: Arc<dyn EffectContext>) -> Result<()> {
        let managers = {
            let properties = self.lock();
            if let Some(current) = &properties.context {
                if Arc::ptr_eq(current, &context) {
                    return Ok(());
                }
                return Err(EffectError::Host(D2DERR_WRONG_STATE));
            }
            properties.resource_texture_managers.clone()
        };

        for manager in managers.iter().flatten() {
            bind_manager_context(manager, &context)?;
        }
        log::debug!(
            "bound effect {:?} to its context with {} resource texture managers",
            self.class_id(),
            managers.iter().flatten().count()
        );
        self.lock().context = Some(context);
        Ok(())
    }

    /// Materialized textures by slot. Slots whose manager is still pending
    /// are skipped.
    pub fn resource_textures(&self) -> Result<Vec<(usize, Arc<dyn ResourceTexture>)>> {
        let managers = self.lock().resource_texture_managers.clone();
        let mut textures = Vec::new();
        for (slot, manager) in managers.iter().enumerate() {
            if let Some(manager) = manager {
                if let Some(texture) = manager_resource_texture(manager)? {
                    textures.push((slot, texture));
                }
            }
        }
        Ok(textures)
    }

    /// Runs the assigned mapper, letting it rewrite the constant buffer.
    /// Without a mapper the output is the first input, or unbounded for an
    /// effect with no inputs.
    pub fn map_inputs_to_output(
        &self,
        inputs: &[Rect],
        opaque_inputs: &[Rect],
    ) -> Result<(Rect, Rect)> {
        let (mapper, mut buffer) = {
            let properties = self.lock();
            (
                properties.transform_mapper.clone(),
                properties.constant_buffer.clone(),
            )
        };
        let Some(mapper) = mapper else {
            return Ok((
                inputs.first().copied().unwrap_or(Rect::INFINITE),
                Rect::default(),
            ));
        };

        let mut context = DrawInfoUpdateContext::new(&mut buffer);
        let mapped = mapper.map_inputs_to_output(&mut context, inputs, opaque_inputs)?;
        self.lock().constant_buffer = buffer;
        Ok(mapped)
    }

    pub fn map_output_to_inputs(&self, output: &Rect, inputs: &mut [Rect]) -> Result<()> {
        match self.transform_mapper() {
            Some(mapper) => mapper.map_output_to_inputs(output, inputs),
            None => {
                inputs.fill(*output);
                Ok(())
            }
        }
    }

    pub fn map_invalid_output(&self, input_index: u32, invalid_input: &Rect) -> Result<Rect> {
        match self.transform_mapper() {
            Some(mapper) => mapper.map_invalid_output(input_index, invalid_input),
            None => Ok(*invalid_input),
        }
    }
}

impl std::fmt::Debug for EffectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectState")
            .field("class_id", &self.class_id())
            .field("constant_buffer_size", &self.constant_buffer_size())
            .finish()
    }
}
