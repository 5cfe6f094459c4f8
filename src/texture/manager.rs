//! The resource texture manager object.
//!
//! The public surface ([`IResourceTextureManager`]) lets callers initialize
//! and update the texture. Binding the manager to a context and reading the
//! materialized texture back only work on managers created here; the crate
//! finds those through a checked downcast of the COM object.
//!
//! All state sits behind one mutex. A call that finds it held, from another
//! thread or reentrantly from a context callback, fails with
//! [`E_ILLEGAL_METHOD_CALL`] instead of waiting.

use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use windows_core::{ComObject, GUID, HRESULT, Interface, OutRef, implement, interface};

use super::region::{Region, copy_region, packed_strides, required_len};
use super::{
    BufferPrecision, ChannelDepth, EffectContext, ExtendMode, Filter, ResourceTexture,
    ResourceTextureDescriptor,
};
use crate::error::{EffectError, Result};
use crate::native::{
    D2DERR_WRONG_STATE, E_ILLEGAL_METHOD_CALL, E_INVALIDARG, E_POINTER, E_UNEXPECTED,
    catch_native, slice_from_raw,
};

/// Texture description as it crosses the native boundary. Enum fields hold
/// the discriminants of [`BufferPrecision`], [`ChannelDepth`], [`Filter`] and
/// [`ExtendMode`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ResourceTextureProperties {
    pub extents: *const u32,
    pub dimensions: u32,
    pub buffer_precision: u32,
    pub channel_depth: u32,
    pub filter: u32,
    pub extend_modes: *const u32,
}

/// Public surface of a resource texture manager.
#[interface("3C4FC7E4-A419-46A1-8F4D-6E3E8A0C5B72")]
pub unsafe trait IResourceTextureManager: windows_core::IUnknown {
    pub fn Initialize(
        &self,
        resource_id: *const GUID,
        properties: *const ResourceTextureProperties,
        data: *const u8,
        strides: *const u32,
        data_size: u32,
    ) -> windows_core::Result<()>;

    pub fn Update(
        &self,
        minimum_extents: *const u32,
        maximum_extents: *const u32,
        strides: *const u32,
        dimensions: u32,
        data: *const u8,
        data_count: u32,
    ) -> windows_core::Result<()>;
}

enum Content {
    Uninitialized,
    /// Descriptor and data buffered until a context is bound.
    Pending {
        resource_id: Option<GUID>,
        descriptor: ResourceTextureDescriptor,
    },
    Materialized {
        texture: Arc<dyn ResourceTexture>,
        extents: Vec<u32>,
        element_size: usize,
    },
}

struct ManagerState {
    context: Option<Arc<dyn EffectContext>>,
    content: Content,
}

fn rejected(reason: &'static str) -> windows_core::Error {
    log::warn!("resource texture manager rejected a call: {reason}");
    E_INVALIDARG.into()
}

fn materialize(
    context: &Arc<dyn EffectContext>,
    resource_id: Option<GUID>,
    descriptor: &ResourceTextureDescriptor,
) -> windows_core::Result<Content> {
    let element_size = descriptor.element_size().ok_or(E_UNEXPECTED)?;
    let texture = context.create_resource_texture(resource_id.as_ref(), descriptor)?;
    log::debug!(
        "materialized {}-dimensional resource texture {:?}",
        descriptor.dimensions(),
        descriptor.extents
    );
    Ok(Content::Materialized {
        texture,
        extents: descriptor.extents.clone(),
        element_size,
    })
}

/// Fails unless `data` covers `region` when laid out with `strides`.
fn check_source(
    region: &Region,
    strides: &[u32],
    element_size: usize,
    data: &[u8],
) -> windows_core::Result<()> {
    let required = required_len(&region.size, strides, element_size).map_err(rejected)?;
    if data.len() < required {
        return Err(rejected("data does not cover the update region"));
    }
    Ok(())
}

impl ManagerState {
    fn initialize(
        &mut self,
        resource_id: Option<GUID>,
        descriptor: ResourceTextureDescriptor,
    ) -> windows_core::Result<()> {
        if !matches!(self.content, Content::Uninitialized) {
            return Err(D2DERR_WRONG_STATE.into());
        }
        self.content = match &self.context {
            Some(context) => materialize(context, resource_id, &descriptor)?,
            None => Content::Pending {
                resource_id,
                descriptor,
            },
        };
        Ok(())
    }

    fn bind_context(&mut self, context: &Arc<dyn EffectContext>) -> windows_core::Result<()> {
        if let Some(current) = &self.context {
            return if Arc::ptr_eq(current, context) {
                Ok(())
            } else {
                log::warn!("resource texture manager is already bound to another context");
                Err(D2DERR_WRONG_STATE.into())
            };
        }
        if let Content::Pending {
            resource_id,
            descriptor,
        } = &self.content
        {
            let content = materialize(context, *resource_id, descriptor)?;
            self.content = content;
        }
        self.context = Some(Arc::clone(context));
        Ok(())
    }

    fn update(
        &mut self,
        dimensions: usize,
        minimum: Option<&[u32]>,
        maximum: Option<&[u32]>,
        strides: &[u32],
        data: &[u8],
    ) -> windows_core::Result<()> {
        match &mut self.content {
            Content::Uninitialized => Err(D2DERR_WRONG_STATE.into()),
            Content::Pending { descriptor, .. } => {
                if dimensions != descriptor.dimensions() {
                    return Err(rejected("dimension count does not match the texture"));
                }
                let element_size = descriptor.element_size().ok_or(E_UNEXPECTED)?;
                let region =
                    Region::resolve(&descriptor.extents, minimum, maximum).map_err(rejected)?;
                check_source(&region, strides, element_size, data)?;

                if descriptor.data.is_empty() {
                    descriptor.strides =
                        packed_strides(&descriptor.extents, element_size).map_err(rejected)?;
                    let len = required_len(&descriptor.extents, &descriptor.strides, element_size)
                        .map_err(rejected)?;
                    descriptor.data = vec![0; len];
                }
                copy_region(
                    &mut descriptor.data,
                    &descriptor.strides,
                    data,
                    strides,
                    &region,
                    element_size,
                );
                Ok(())
            }
            Content::Materialized {
                texture,
                extents,
                element_size,
            } => {
                if dimensions != extents.len() {
                    return Err(rejected("dimension count does not match the texture"));
                }
                let region = Region::resolve(extents, minimum, maximum).map_err(rejected)?;
                check_source(&region, strides, *element_size, data)?;
                let (minimum, maximum) = match (minimum, maximum) {
                    (Some(minimum), Some(maximum)) => (Some(minimum), Some(maximum)),
                    _ => (None, None),
                };
                Ok(texture.update(minimum, maximum, strides, data)?)
            }
        }
    }
}

#[implement(IResourceTextureManager)]
struct ManagerObject {
    state: Mutex<ManagerState>,
}

impl ManagerObject {
    fn new() -> Self {
        Self {
            state: Mutex::new(ManagerState {
                context: None,
                content: Content::Uninitialized,
            }),
        }
    }

    fn state(&self) -> windows_core::Result<MutexGuard<'_, ManagerState>> {
        match self.state.try_lock() {
            Ok(state) => Ok(state),
            // Transitions are committed only after the fallible work succeeds.
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                log::warn!("resource texture manager called while another call is in progress");
                Err(E_ILLEGAL_METHOD_CALL.into())
            }
        }
    }

    fn bind_context(&self, context: &Arc<dyn EffectContext>) -> windows_core::Result<()> {
        catch_native("bind_context", || self.state()?.bind_context(context))
    }

    fn resource_texture(&self) -> windows_core::Result<Option<Arc<dyn ResourceTexture>>> {
        Ok(match &self.state()?.content {
            Content::Materialized { texture, .. } => Some(Arc::clone(texture)),
            _ => None,
        })
    }
}

#[allow(non_snake_case)]
impl IResourceTextureManager_Impl for ManagerObject_Impl {
    unsafe fn Initialize(
        &self,
        resource_id: *const GUID,
        properties: *const ResourceTextureProperties,
        data: *const u8,
        strides: *const u32,
        data_size: u32,
    ) -> windows_core::Result<()> {
        catch_native("initialize", || unsafe {
            let properties = properties.as_ref().ok_or(E_POINTER)?;
            let dimensions = properties.dimensions as usize;
            if dimensions == 0 || dimensions > super::MAX_DIMENSIONS {
                return Err(rejected("unsupported dimension count"));
            }
            let extents = slice_from_raw(properties.extents, dimensions)?.to_vec();
            let extend_modes = slice_from_raw(properties.extend_modes, dimensions)?
                .iter()
                .map(|&mode| ExtendMode::try_from(mode))
                .collect::<std::result::Result<Vec<_>, HRESULT>>()?;
            let data = slice_from_raw(data, data_size as usize)?.to_vec();
            let strides = if data.is_empty() {
                Vec::new()
            } else {
                slice_from_raw(strides, dimensions - 1)?.to_vec()
            };
            let descriptor = ResourceTextureDescriptor {
                extents,
                buffer_precision: BufferPrecision::try_from(properties.buffer_precision)?,
                channel_depth: ChannelDepth::try_from(properties.channel_depth)?,
                filter: Filter::try_from(properties.filter)?,
                extend_modes,
                data,
                strides,
            };
            descriptor.validate().map_err(|e| {
                log::warn!("resource texture manager rejected a descriptor: {e}");
                windows_core::Error::from(e)
            })?;

            self.state()?.initialize(resource_id.as_ref().copied(), descriptor)
        })
    }

    unsafe fn Update(
        &self,
        minimum_extents: *const u32,
        maximum_extents: *const u32,
        strides: *const u32,
        dimensions: u32,
        data: *const u8,
        data_count: u32,
    ) -> windows_core::Result<()> {
        catch_native("update", || unsafe {
            let dimensions = dimensions as usize;
            let (minimum, maximum) = if minimum_extents.is_null() || maximum_extents.is_null() {
                (None, None)
            } else {
                (
                    Some(slice_from_raw(minimum_extents, dimensions)?),
                    Some(slice_from_raw(maximum_extents, dimensions)?),
                )
            };
            let strides = slice_from_raw(strides, dimensions.saturating_sub(1))?;
            let data = slice_from_raw(data, data_count as usize)?;

            self.state()?
                .update(dimensions, minimum, maximum, strides, data)
        })
    }
}

/// Creates an uninitialized manager and stores one reference in `out`.
///
/// # Safety
///
/// `out` must be null or valid for a pointer write.
pub unsafe extern "system" fn create_resource_texture_manager(
    out: OutRef<'_, IResourceTextureManager>,
) -> HRESULT {
    let manager: IResourceTextureManager = ManagerObject::new().into();
    out.write(Some(manager)).into()
}

fn object_of(manager: &IResourceTextureManager) -> Result<&ManagerObject_Impl> {
    Ok(manager.cast_object_ref::<ManagerObject>()?)
}

/// Whether `manager` was created by this crate and can be bound to a context.
pub(crate) fn is_bindable(manager: &IResourceTextureManager) -> bool {
    object_of(manager).is_ok()
}

/// Binds `manager` to `context`, materializing a pending texture.
pub(crate) fn bind_manager_context(
    manager: &IResourceTextureManager,
    context: &Arc<dyn EffectContext>,
) -> Result<()> {
    Ok(object_of(manager)?.bind_context(context)?)
}

/// The materialized texture behind `manager`, if any.
pub(crate) fn manager_resource_texture(
    manager: &IResourceTextureManager,
) -> Result<Option<Arc<dyn ResourceTexture>>> {
    Ok(object_of(manager)?.resource_texture()?)
}

/// Owner of a resource texture manager.
///
/// Can be moved to another thread but not shared between threads.
///
/// # Example
///
/// ```ignore
/// let lut = ResourceTextureManager::new(
///     ResourceTextureDescriptor::new(vec![256], vec![ExtendMode::Clamp])
///         .with_data(ramp, vec![]),
/// )?;
/// instance.set_resource_texture_manager(0, Some(&lut))?;
/// ```
pub struct ResourceTextureManager {
    object: ComObject<ManagerObject>,
    dimensions: usize,
    _not_sync: PhantomData<Cell<()>>,
}

impl ResourceTextureManager {
    pub fn new(descriptor: ResourceTextureDescriptor) -> Result<Self> {
        Self::create(None, descriptor)
    }

    /// Like [`ResourceTextureManager::new`], with an id the host can use to
    /// share the texture between effects.
    pub fn with_resource_id(
        resource_id: GUID,
        descriptor: ResourceTextureDescriptor,
    ) -> Result<Self> {
        Self::create(Some(resource_id), descriptor)
    }

    fn create(resource_id: Option<GUID>, descriptor: ResourceTextureDescriptor) -> Result<Self> {
        descriptor.validate()?;
        let data_size = u32::try_from(descriptor.data.len())
            .map_err(|_| EffectError::InvalidArgument("texture data is too large"))?;
        let extend_modes: Vec<u32> = descriptor.extend_modes.iter().map(|&m| m as u32).collect();
        let properties = ResourceTextureProperties {
            extents: descriptor.extents.as_ptr(),
            dimensions: descriptor.extents.len() as u32,
            buffer_precision: descriptor.buffer_precision as u32,
            channel_depth: descriptor.channel_depth as u32,
            filter: descriptor.filter as u32,
            extend_modes: extend_modes.as_ptr(),
        };
        let resource_id = resource_id.as_ref().map_or(ptr::null(), |id| id as *const GUID);

        let object = ComObject::new(ManagerObject::new());
        let native = object.to_interface::<IResourceTextureManager>();
        // SAFETY: every pointer is valid for the lengths in `properties`.
        unsafe {
            native.Initialize(
                resource_id,
                &properties,
                descriptor.data.as_ptr(),
                descriptor.strides.as_ptr(),
                data_size,
            )
        }?;

        Ok(Self {
            object,
            dimensions: descriptor.extents.len(),
            _not_sync: PhantomData,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Writes `data` into `[minimum_extents, maximum_extents)`, or into the
    /// whole texture when either bound is omitted. Before materialization
    /// this patches the buffered data.
    pub fn update(
        &self,
        minimum_extents: Option<&[u32]>,
        maximum_extents: Option<&[u32]>,
        strides: &[u32],
        data: &[u8],
    ) -> Result<()> {
        let (minimum, maximum) = match (minimum_extents, maximum_extents) {
            (Some(minimum), Some(maximum)) => {
                if minimum.len() != self.dimensions || maximum.len() != self.dimensions {
                    return Err(EffectError::InvalidArgument(
                        "update extents must have one entry per dimension",
                    ));
                }
                (minimum.as_ptr(), maximum.as_ptr())
            }
            _ => (ptr::null(), ptr::null()),
        };
        if strides.len() != self.dimensions - 1 {
            return Err(EffectError::InvalidArgument(
                "strides must have one entry per dimension after the first",
            ));
        }
        let count = u32::try_from(data.len())
            .map_err(|_| EffectError::InvalidArgument("texture data is too large"))?;

        // SAFETY: lengths were checked against `dimensions` above.
        unsafe {
            self.native().Update(
                minimum,
                maximum,
                strides.as_ptr(),
                self.dimensions as u32,
                data.as_ptr(),
                count,
            )
        }?;
        Ok(())
    }

    /// Hands out a counted pointer to the public surface.
    pub fn native(&self) -> IResourceTextureManager {
        self.object.to_interface()
    }

    pub fn bind_context(&self, context: &Arc<dyn EffectContext>) -> Result<()> {
        Ok(self.object.bind_context(context)?)
    }

    pub fn resource_texture(&self) -> Option<Arc<dyn ResourceTexture>> {
        self.object.resource_texture().ok().flatten()
    }

    pub fn is_materialized(&self) -> bool {
        self.resource_texture().is_some()
    }
}

impl std::fmt::Debug for ResourceTextureManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTextureManager")
            .field("native", &self.native().as_raw())
            .field("dimensions", &self.dimensions)
            .finish()
    }
}
