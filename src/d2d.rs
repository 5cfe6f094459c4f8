//! Direct2D as the effect host.
//!
//! [`Direct2DEffect`] is the object the default factory hands to Direct2D. It
//! carries an [`EffectState`], loads the effect's pixel shader when Direct2D
//! initializes it, installs itself as the single draw transform, and routes
//! the rectangle mapping calls through the state's transform mapper.
//! Compute shader effects are not driven here; their `Initialize` fails with
//! `E_NOTIMPL`.

use std::ffi::c_void;
use std::sync::{Arc, Mutex, PoisonError};

use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct2D::{
    D2D1_BUFFER_PRECISION, D2D1_CHANGE_TYPE, D2D1_CHANNEL_DEPTH, D2D1_EXTEND_MODE, D2D1_FILTER,
    D2D1_PIXEL_OPTIONS_NONE, D2D1_PROPERTY_BINDING, D2D1_PROPERTY_TYPE_UNKNOWN,
    D2D1_RESOURCE_TEXTURE_PROPERTIES, ID2D1DeviceContext, ID2D1DrawInfo, ID2D1DrawTransform,
    ID2D1DrawTransform_Impl, ID2D1Effect, ID2D1EffectContext, ID2D1EffectImpl,
    ID2D1EffectImpl_Impl, ID2D1Factory1, ID2D1ResourceTexture, ID2D1Transform_Impl,
    ID2D1TransformGraph, ID2D1TransformNode_Impl,
};
use windows::core::{HSTRING, PCWSTR};
use windows_core::{GUID, HRESULT, IUnknown, IUnknownImpl, Interface, OutRef, Ref, implement};

use crate::effects::{
    ConstantBuffer, EffectFactoryFn, EffectHost, EffectKind, EffectState, HostEffect,
    IEffectStateSource, IEffectStateSource_Impl, PropertyBinding, ShaderEffect,
};
use crate::error::{EffectError, Result};
use crate::mapper::Rect;
use crate::native::{
    D2DERR_WRONG_STATE, E_NOT_SUFFICIENT_BUFFER, E_NOTIMPL, E_POINTER, catch_native,
    slice_from_raw, slice_from_raw_mut,
};
use crate::texture::{EffectContext, ResourceTexture, ResourceTextureDescriptor};

fn rect_from_native(rect: &RECT) -> Rect {
    Rect::new(rect.left, rect.top, rect.right, rect.bottom)
}

fn rect_to_native(rect: Rect) -> RECT {
    RECT {
        left: rect.left,
        top: rect.top,
        right: rect.right,
        bottom: rect.bottom,
    }
}

/// The effect object Direct2D creates through the default factory.
#[implement(ID2D1EffectImpl, ID2D1DrawTransform, IEffectStateSource)]
pub struct Direct2DEffect {
    state: EffectState,
    shader_id: GUID,
    shader: &'static [u8],
    input_count: u32,
    kind: EffectKind,
    draw_info: Mutex<Option<ID2D1DrawInfo>>,
}

impl Direct2DEffect {
    pub fn new<E: ShaderEffect>() -> Self {
        Self {
            state: EffectState::new(E::CLSID, E::Constants::SIZE),
            shader_id: E::CLSID,
            shader: E::shader_bytecode(),
            input_count: E::INPUT_COUNT,
            kind: E::KIND,
            draw_info: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &EffectState {
        &self.state
    }

    fn draw_info(&self) -> Option<ID2D1DrawInfo> {
        self.draw_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Hands the current constant buffer to the draw info, if there is one.
    fn push_constants(&self) -> windows_core::Result<()> {
        let Some(draw_info) = self.draw_info() else {
            return Ok(());
        };
        let constants = self.state.constant_buffer();
        if !constants.is_empty() {
            unsafe { draw_info.SetPixelShaderConstantBuffer(&constants)? };
        }
        Ok(())
    }
}

/// Factory creating a [`Direct2DEffect`] for `E`.
///
/// # Safety
///
/// `effect_impl` must be null or valid for a pointer write.
pub unsafe extern "system" fn create_direct2d_effect<E: ShaderEffect>(
    effect_impl: OutRef<'_, IUnknown>,
) -> HRESULT {
    catch_native("create_direct2d_effect", || {
        effect_impl.write(Some(Direct2DEffect::new::<E>().into()))
    })
    .into()
}

#[allow(non_snake_case)]
impl ID2D1EffectImpl_Impl for Direct2DEffect_Impl {
    fn Initialize(
        &self,
        effectcontext: Ref<'_, ID2D1EffectContext>,
        transformgraph: Ref<'_, ID2D1TransformGraph>,
    ) -> windows_core::Result<()> {
        catch_native("Initialize", || {
            if self.kind == EffectKind::ComputeShader {
                log::warn!(
                    "effect {:?} is a compute shader effect, which Direct2DEffect cannot drive",
                    self.shader_id
                );
                return Err(E_NOTIMPL.into());
            }
            let context = effectcontext.ok()?;
            let graph = transformgraph.ok()?;

            unsafe { context.LoadPixelShader(&self.shader_id, self.shader)? };
            self.state
                .bind_context(Arc::new(Direct2DEffectContext::new(context.clone())))?;

            let transform: ID2D1DrawTransform = self.to_interface();
            unsafe { graph.SetSingleTransformNode(&transform)? };
            log::debug!("initialized Direct2D effect {:?}", self.shader_id);
            Ok(())
        })
    }

    fn PrepareForRender(&self, _changetype: D2D1_CHANGE_TYPE) -> windows_core::Result<()> {
        catch_native("PrepareForRender", || {
            let draw_info = self.draw_info().ok_or(D2DERR_WRONG_STATE)?;
            self.push_constants()?;
            for (slot, texture) in self.state.resource_textures()? {
                let Some(native) = texture.native() else {
                    continue;
                };
                let texture = native.cast::<ID2D1ResourceTexture>()?;
                unsafe { draw_info.SetResourceTexture(slot as u32, &texture)? };
            }
            Ok(())
        })
    }

    fn SetGraph(&self, _transformgraph: Ref<'_, ID2D1TransformGraph>) -> windows_core::Result<()> {
        // Only called for variable input counts, which the XML never declares.
        Err(E_NOTIMPL.into())
    }
}

#[allow(non_snake_case)]
impl ID2D1TransformNode_Impl for Direct2DEffect_Impl {
    fn GetInputCount(&self) -> u32 {
        self.input_count
    }
}

#[allow(clippy::not_unsafe_ptr_arg_deref)]
#[allow(non_snake_case)]
impl ID2D1Transform_Impl for Direct2DEffect_Impl {
    fn MapOutputRectToInputRects(
        &self,
        outputrect: *const RECT,
        inputrects: *mut RECT,
        inputrectscount: u32,
    ) -> windows_core::Result<()> {
        catch_native("MapOutputRectToInputRects", || unsafe {
            let output = outputrect.as_ref().ok_or(E_POINTER)?;
            let native_inputs = slice_from_raw_mut(inputrects, inputrectscount as usize)?;
            let mut inputs = vec![Rect::default(); native_inputs.len()];
            self.state
                .map_output_to_inputs(&rect_from_native(output), &mut inputs)?;
            for (native, rect) in native_inputs.iter_mut().zip(inputs) {
                *native = rect_to_native(rect);
            }
            Ok(())
        })
    }

    fn MapInputRectsToOutputRect(
        &self,
        inputrects: *const RECT,
        inputopaquesubrects: *const RECT,
        inputrectcount: u32,
        outputrect: *mut RECT,
        outputopaquesubrect: *mut RECT,
    ) -> windows_core::Result<()> {
        catch_native("MapInputRectsToOutputRect", || unsafe {
            if outputrect.is_null() || outputopaquesubrect.is_null() {
                return Err(E_POINTER.into());
            }
            let count = inputrectcount as usize;
            let inputs: Vec<Rect> = slice_from_raw(inputrects, count)?
                .iter()
                .map(rect_from_native)
                .collect();
            let opaque: Vec<Rect> = slice_from_raw(inputopaquesubrects, count)?
                .iter()
                .map(rect_from_native)
                .collect();

            let (output, opaque_output) = self.state.map_inputs_to_output(&inputs, &opaque)?;
            *outputrect = rect_to_native(output);
            *outputopaquesubrect = rect_to_native(opaque_output);
            // The mapper may have rewritten the constants.
            self.push_constants()
        })
    }

    fn MapInvalidRect(
        &self,
        inputindex: u32,
        invalidinputrect: &RECT,
    ) -> windows_core::Result<RECT> {
        catch_native("MapInvalidRect", || {
            let invalid = self
                .state
                .map_invalid_output(inputindex, &rect_from_native(invalidinputrect))?;
            Ok(rect_to_native(invalid))
        })
    }
}

#[allow(non_snake_case)]
impl ID2D1DrawTransform_Impl for Direct2DEffect_Impl {
    fn SetDrawInfo(&self, drawinfo: Ref<'_, ID2D1DrawInfo>) -> windows_core::Result<()> {
        let draw_info = drawinfo.ok()?;
        unsafe { draw_info.SetPixelShader(&self.shader_id, D2D1_PIXEL_OPTIONS_NONE)? };
        *self.draw_info.lock().unwrap_or_else(PoisonError::into_inner) = Some(draw_info.clone());
        Ok(())
    }
}

#[allow(non_snake_case)]
impl IEffectStateSource_Impl for Direct2DEffect_Impl {
    unsafe fn GetEffectState(&self, state: *mut *mut c_void) -> HRESULT {
        unsafe { self.state.write_native(state) }
    }
}

/// Wrapper around `D2D1_PROPERTY_BINDING` whose name buffer stays alive for
/// as long as the binding.
struct OwnedPropertyBinding {
    _name: HSTRING,
    binding: D2D1_PROPERTY_BINDING,
}

impl OwnedPropertyBinding {
    fn new(binding: &PropertyBinding) -> Self {
        let name = HSTRING::from(binding.name.as_ref());
        // SAFETY: the getter and setter signatures are ABI-identical to the
        // Direct2D property function types, which take the effect as a
        // transparent `Ref`; `None` stays `None`.
        let binding = unsafe {
            D2D1_PROPERTY_BINDING {
                propertyName: PCWSTR(name.as_ptr()),
                setFunction: std::mem::transmute(binding.setter),
                getFunction: std::mem::transmute(binding.getter),
            }
        };
        Self {
            _name: name,
            binding,
        }
    }
}

/// Registers effects with a Direct2D factory and creates them on one device
/// context.
#[derive(Debug, Clone)]
pub struct Direct2DHost {
    factory: ID2D1Factory1,
    context: ID2D1DeviceContext,
}

impl Direct2DHost {
    pub fn new(factory: ID2D1Factory1, context: ID2D1DeviceContext) -> Self {
        Self { factory, context }
    }

    pub fn factory(&self) -> &ID2D1Factory1 {
        &self.factory
    }

    pub fn device_context(&self) -> &ID2D1DeviceContext {
        &self.context
    }
}

impl EffectHost for Direct2DHost {
    type Effect = ID2D1Effect;

    fn register_effect_from_string(
        &self,
        class_id: &GUID,
        property_xml: &str,
        bindings: &[PropertyBinding],
        factory: EffectFactoryFn,
    ) -> Result<()> {
        let owned: Vec<OwnedPropertyBinding> =
            bindings.iter().map(OwnedPropertyBinding::new).collect();
        let raw: Vec<D2D1_PROPERTY_BINDING> = owned.iter().map(|b| b.binding).collect();

        unsafe {
            self.factory.RegisterEffectFromString(
                class_id,
                &HSTRING::from(property_xml),
                Some(raw.as_slice()),
                Some(factory),
            )?;
        }
        Ok(())
    }

    fn unregister_effect(&self, class_id: &GUID) -> Result<()> {
        unsafe { self.factory.UnregisterEffect(class_id)? };
        Ok(())
    }

    fn create_effect(&self, class_id: &GUID) -> Result<ID2D1Effect> {
        Ok(unsafe { self.context.CreateEffect(class_id)? })
    }
}

impl HostEffect for ID2D1Effect {
    fn set_value(&self, index: u32, data: &[u8]) -> Result<()> {
        unsafe { self.SetValue(index, D2D1_PROPERTY_TYPE_UNKNOWN, data)? };
        Ok(())
    }

    fn get_value(&self, index: u32, data: &mut [u8]) -> Result<usize> {
        let size = unsafe { self.GetValueSize(index) } as usize;
        if data.len() < size {
            return Err(EffectError::Host(E_NOT_SUFFICIENT_BUFFER));
        }
        unsafe { self.GetValue(index, D2D1_PROPERTY_TYPE_UNKNOWN, &mut data[..size])? };
        Ok(size)
    }
}

/// `EffectContext` over the context Direct2D passes to an effect's
/// `Initialize`.
pub struct Direct2DEffectContext(ID2D1EffectContext);

// SAFETY: Direct2D calls an effect from one thread at a time, and the
// context is only used from within those calls.
unsafe impl Send for Direct2DEffectContext {}
unsafe impl Sync for Direct2DEffectContext {}

impl Direct2DEffectContext {
    pub fn new(context: ID2D1EffectContext) -> Self {
        Self(context)
    }
}

impl EffectContext for Direct2DEffectContext {
    fn create_resource_texture(
        &self,
        resource_id: Option<&GUID>,
        descriptor: &ResourceTextureDescriptor,
    ) -> Result<Arc<dyn ResourceTexture>> {
        let extend_modes: Vec<D2D1_EXTEND_MODE> = descriptor
            .extend_modes
            .iter()
            .map(|&mode| D2D1_EXTEND_MODE(mode as i32))
            .collect();
        let properties = D2D1_RESOURCE_TEXTURE_PROPERTIES {
            extents: descriptor.extents.as_ptr(),
            dimensions: descriptor.extents.len() as u32,
            bufferPrecision: D2D1_BUFFER_PRECISION(descriptor.buffer_precision as i32),
            channelDepth: D2D1_CHANNEL_DEPTH(descriptor.channel_depth as i32),
            filter: D2D1_FILTER(descriptor.filter as i32),
            extendModes: extend_modes.as_ptr(),
        };
        let data = (!descriptor.data.is_empty()).then_some(descriptor.data.as_slice());
        let strides = (!descriptor.strides.is_empty()).then(|| descriptor.strides.as_ptr());

        let texture = unsafe {
            self.0.CreateResourceTexture(
                resource_id.map(|id| id as *const GUID),
                &properties,
                data,
                strides,
            )?
        };
        Ok(Arc::new(Direct2DResourceTexture(texture)))
    }
}

struct Direct2DResourceTexture(ID2D1ResourceTexture);

// SAFETY: see `Direct2DEffectContext`.
unsafe impl Send for Direct2DResourceTexture {}
unsafe impl Sync for Direct2DResourceTexture {}

impl ResourceTexture for Direct2DResourceTexture {
    fn update(
        &self,
        minimum_extents: Option<&[u32]>,
        maximum_extents: Option<&[u32]>,
        strides: &[u32],
        data: &[u8],
    ) -> Result<()> {
        let dimensions = strides.len() as u32 + 1;
        unsafe {
            self.0.Update(
                minimum_extents.map(<[u32]>::as_ptr),
                maximum_extents.map(<[u32]>::as_ptr),
                (!strides.is_empty()).then(|| strides.as_ptr()),
                dimensions,
                data,
            )?
        };
        Ok(())
    }

    fn native(&self) -> Option<IUnknown> {
        Some(self.0.clone().into())
    }
}
