//! Transform mappers: policies describing how an effect's output region maps
//! to and from its input regions, exposed to the host as native objects.
//!
//! The host holds counted references to a small native handle. The policy
//! itself is owned on the Rust side by a [`TransformMapper`], and the handle
//! only tracks it weakly, so a host that keeps handles around forever does
//! not keep policies alive. Every time the owner hands a pointer out it
//! re-attaches itself to the handle under the handle's spin lock.
//!
//! Calling into a handle whose owner is gone fails with
//! [`RO_E_CLOSED`](crate::native::RO_E_CLOSED). Keeping the owner alive while
//! the host may still call the handle is the caller's job.

use std::ptr;
use std::sync::{Arc, Weak};

use windows_core::{ComObject, DYNAMIC_CAST_IID, GUID, IUnknown, Interface, implement, interface};

use crate::effects::ConstantBuffer;
use crate::error::{EffectError, Result};
use crate::native::{
    E_NOINTERFACE, E_POINTER, RO_E_CLOSED, SpinLock, catch_native, slice_from_raw,
    slice_from_raw_mut,
};

/// Integer rectangle with the layout of `D2D1_RECT_L`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    /// The rectangle Direct2D uses for "unbounded".
    pub const INFINITE: Rect = Rect {
        left: i32::MIN,
        top: i32::MIN,
        right: i32::MAX,
        bottom: i32::MAX,
    };

    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }
}

/// Access to the effect's constant buffer while inputs are mapped to the
/// output, so a mapper can feed geometry into the shader.
pub struct DrawInfoUpdateContext<'a> {
    constant_buffer: &'a mut [u8],
}

impl<'a> DrawInfoUpdateContext<'a> {
    pub fn new(constant_buffer: &'a mut [u8]) -> Self {
        Self { constant_buffer }
    }

    pub fn constant_buffer(&self) -> &[u8] {
        self.constant_buffer
    }

    pub fn constant_buffer_size(&self) -> usize {
        self.constant_buffer.len()
    }

    pub fn set_constant_buffer(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.constant_buffer.len() {
            return Err(EffectError::InvalidArgument(
                "constant buffer size does not match the effect",
            ));
        }
        self.constant_buffer.copy_from_slice(bytes);
        Ok(())
    }

    pub fn constants<T: ConstantBuffer>(&self) -> Result<T> {
        if T::SIZE != self.constant_buffer.len() {
            return Err(EffectError::InvalidArgument(
                "constant buffer size does not match the effect",
            ));
        }
        Ok(T::read_from(self.constant_buffer))
    }

    pub fn set_constants<T: ConstantBuffer>(&mut self, value: &T) -> Result<()> {
        let mut bytes = vec![0u8; T::SIZE];
        value.write_to(&mut bytes);
        self.set_constant_buffer(&bytes)
    }
}

/// A mapping policy. Within one rendering pass the host calls
/// `map_inputs_to_output` before the other two methods.
pub trait TransformMapping: Send + Sync + 'static {
    /// Computes the output rectangle and its opaque sub-rectangle.
    fn map_inputs_to_output(
        &self,
        context: &mut DrawInfoUpdateContext<'_>,
        inputs: &[Rect],
        opaque_inputs: &[Rect],
    ) -> Result<(Rect, Rect)>;

    /// Fills in the input rectangles needed to produce `output`.
    fn map_output_to_inputs(&self, output: &Rect, inputs: &mut [Rect]) -> Result<()>;

    /// Returns the output region invalidated by a change in one input.
    fn map_invalid_output(&self, input_index: u32, invalid_input: &Rect) -> Result<Rect>;
}

/// The transform mapper surface handed to the host.
#[interface("02E6D48D-B892-4FBC-AA54-119203BAB802")]
pub unsafe trait ITransformMapper: windows_core::IUnknown {
    pub fn MapInputRectsToOutputRect(
        &self,
        constant_buffer: *mut u8,
        constant_buffer_size: u32,
        input_rects: *const Rect,
        input_opaque_sub_rects: *const Rect,
        input_rect_count: u32,
        output_rect: *mut Rect,
        output_opaque_sub_rect: *mut Rect,
    ) -> windows_core::Result<()>;

    pub fn MapOutputRectToInputRects(
        &self,
        output_rect: *const Rect,
        input_rects: *mut Rect,
        input_rects_count: u32,
    ) -> windows_core::Result<()>;

    pub fn MapInvalidRect(
        &self,
        input_index: u32,
        invalid_input_rect: *const Rect,
        invalid_output_rect: *mut Rect,
    ) -> windows_core::Result<()>;
}

/// The native handle the host sees.
#[implement(ITransformMapper)]
struct MapperHandle {
    owner: SpinLock<Option<Weak<dyn TransformMapping>>>,
}

impl MapperHandle {
    /// Upgrades the tracked owner, holding the lock only for the upgrade.
    fn owner(&self) -> windows_core::Result<Arc<dyn TransformMapping>> {
        let owner = self.owner.lock().as_ref().and_then(Weak::upgrade);
        owner.ok_or_else(|| {
            log::warn!("transform mapper invoked after its owner was dropped");
            RO_E_CLOSED.into()
        })
    }

    fn is_attached(&self) -> bool {
        self.owner
            .lock()
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    }
}

#[allow(non_snake_case)]
impl ITransformMapper_Impl for MapperHandle_Impl {
    unsafe fn MapInputRectsToOutputRect(
        &self,
        constant_buffer: *mut u8,
        constant_buffer_size: u32,
        input_rects: *const Rect,
        input_opaque_sub_rects: *const Rect,
        input_rect_count: u32,
        output_rect: *mut Rect,
        output_opaque_sub_rect: *mut Rect,
    ) -> windows_core::Result<()> {
        catch_native("map_inputs_to_output", || unsafe {
            if output_rect.is_null() || output_opaque_sub_rect.is_null() {
                return Err(E_POINTER.into());
            }
            let policy = self.owner()?;
            let inputs = slice_from_raw(input_rects, input_rect_count as usize)?;
            let opaque_inputs = slice_from_raw(input_opaque_sub_rects, input_rect_count as usize)?;
            let buffer = slice_from_raw_mut(constant_buffer, constant_buffer_size as usize)?;

            let mut context = DrawInfoUpdateContext::new(buffer);
            let (output, opaque) =
                policy.map_inputs_to_output(&mut context, inputs, opaque_inputs)?;
            *output_rect = output;
            *output_opaque_sub_rect = opaque;
            Ok(())
        })
    }

    unsafe fn MapOutputRectToInputRects(
        &self,
        output_rect: *const Rect,
        input_rects: *mut Rect,
        input_rects_count: u32,
    ) -> windows_core::Result<()> {
        catch_native("map_output_to_inputs", || unsafe {
            if output_rect.is_null() {
                return Err(E_POINTER.into());
            }
            let policy = self.owner()?;
            let inputs = slice_from_raw_mut(input_rects, input_rects_count as usize)?;
            Ok(policy.map_output_to_inputs(&*output_rect, inputs)?)
        })
    }

    unsafe fn MapInvalidRect(
        &self,
        input_index: u32,
        invalid_input_rect: *const Rect,
        invalid_output_rect: *mut Rect,
    ) -> windows_core::Result<()> {
        catch_native("map_invalid_output", || unsafe {
            if invalid_input_rect.is_null() || invalid_output_rect.is_null() {
                return Err(E_POINTER.into());
            }
            let policy = self.owner()?;
            *invalid_output_rect = policy.map_invalid_output(input_index, &*invalid_input_rect)?;
            Ok(())
        })
    }
}

/// Owner of a mapping policy and of one reference to its native handle.
///
/// # Example
///
/// ```ignore
/// let mapper = TransformMapper::new(MyMapping { radius: 4 });
/// instance.set_transform_mapper(Some(&mapper))?;
/// // `mapper` must outlive any rendering that uses the effect.
/// ```
pub struct TransformMapper {
    policy: Arc<dyn TransformMapping>,
    handle: ComObject<MapperHandle>,
}

impl TransformMapper {
    pub fn new<P: TransformMapping>(policy: P) -> Self {
        Self::from_arc(Arc::new(policy))
    }

    /// Wraps a policy that may also be owned elsewhere. The handle stays
    /// usable for as long as any strong reference to the policy exists.
    pub fn from_arc(policy: Arc<dyn TransformMapping>) -> Self {
        let handle = ComObject::new(MapperHandle {
            owner: SpinLock::new(Some(Arc::downgrade(&policy))),
        });
        Self { policy, handle }
    }

    pub fn policy(&self) -> &Arc<dyn TransformMapping> {
        &self.policy
    }

    /// Hands out a counted pointer to the native handle.
    pub fn native(&self) -> ITransformMapper {
        let keep_alive = Arc::clone(&self.policy);
        let native = {
            let mut owner = self.handle.owner.lock();
            *owner = Some(Arc::downgrade(&keep_alive));
            self.handle.to_interface::<ITransformMapper>()
        };
        drop(keep_alive);
        native
    }

    /// Hands out the capability surface identified by `iid`.
    pub fn query_capability(&self, iid: &GUID) -> Result<IUnknown> {
        // That id writes a fat pointer into the out slot.
        if *iid == DYNAMIC_CAST_IID {
            return Err(EffectError::Host(E_NOINTERFACE));
        }
        let native = self.native();
        let mut raw: *mut std::ffi::c_void = ptr::null_mut();
        // SAFETY: `raw` is a valid out slot for one interface pointer.
        unsafe { native.query(iid, &mut raw) }.ok()?;
        // SAFETY: a successful query transfers one reference.
        Ok(unsafe { IUnknown::from_raw(raw) })
    }
}

/// Whether a handle still has a live owner to forward calls to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    Unattached,
    Attached,
}

/// Caller-side view of any object exposing the transform mapper surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformMapperRef(ITransformMapper);

impl TransformMapperRef {
    pub fn new(mapper: ITransformMapper) -> Self {
        Self(mapper)
    }

    pub fn from_unknown(unknown: &IUnknown) -> Result<Self> {
        Ok(Self(unknown.cast()?))
    }

    pub fn as_interface(&self) -> &ITransformMapper {
        &self.0
    }

    pub fn map_inputs_to_output(
        &self,
        context: &mut DrawInfoUpdateContext<'_>,
        inputs: &[Rect],
        opaque_inputs: &[Rect],
    ) -> Result<(Rect, Rect)> {
        if inputs.len() != opaque_inputs.len() {
            return Err(EffectError::InvalidArgument(
                "every input needs an opaque sub-rectangle",
            ));
        }
        let count = u32::try_from(inputs.len())
            .map_err(|_| EffectError::InvalidArgument("too many inputs"))?;
        let size = u32::try_from(context.constant_buffer.len())
            .map_err(|_| EffectError::InvalidArgument("constant buffer is too large"))?;
        let mut output = Rect::default();
        let mut opaque_output = Rect::default();
        // SAFETY: all pointers are valid for the declared counts.
        unsafe {
            self.0.MapInputRectsToOutputRect(
                context.constant_buffer.as_mut_ptr(),
                size,
                inputs.as_ptr(),
                opaque_inputs.as_ptr(),
                count,
                &mut output,
                &mut opaque_output,
            )
        }?;
        Ok((output, opaque_output))
    }

    pub fn map_output_to_inputs(&self, output: &Rect, inputs: &mut [Rect]) -> Result<()> {
        let count = u32::try_from(inputs.len())
            .map_err(|_| EffectError::InvalidArgument("too many inputs"))?;
        // SAFETY: `inputs` is valid for `count` writes.
        unsafe {
            self.0
                .MapOutputRectToInputRects(output, inputs.as_mut_ptr(), count)
        }?;
        Ok(())
    }

    pub fn map_invalid_output(&self, input_index: u32, invalid_input: &Rect) -> Result<Rect> {
        let mut invalid_output = Rect::default();
        // SAFETY: both pointers reference locals.
        unsafe {
            self.0
                .MapInvalidRect(input_index, invalid_input, &mut invalid_output)
        }?;
        Ok(invalid_output)
    }

    /// `None` when the object was not created by [`TransformMapper`].
    pub fn attachment_state(&self) -> Option<AttachmentState> {
        let handle = self.0.cast_object_ref::<MapperHandle>().ok()?;
        Some(if handle.is_attached() {
            AttachmentState::Attached
        } else {
            AttachmentState::Unattached
        })
    }
}

impl From<ITransformMapper> for TransformMapperRef {
    fn from(mapper: ITransformMapper) -> Self {
        Self(mapper)
    }
}

#[cfg(test)]
mod tests {
    use windows_core::IUnknownImpl;

    use super::*;
    use crate::native::{E_FAIL, E_INVALIDARG};

    /// Grows every input by `radius` and records it in the constant buffer.
    struct Inflate {
        radius: i32,
    }

    impl TransformMapping for Inflate {
        fn map_inputs_to_output(
            &self,
            context: &mut DrawInfoUpdateContext<'_>,
            inputs: &[Rect],
            _opaque_inputs: &[Rect],
        ) -> Result<(Rect, Rect)> {
            context.set_constants(&[self.radius, inputs.len() as i32])?;
            let first = inputs.first().copied().unwrap_or_default();
            Ok((
                Rect::new(
                    first.left - self.radius,
                    first.top - self.radius,
                    first.right + self.radius,
                    first.bottom + self.radius,
                ),
                Rect::default(),
            ))
        }

        fn map_output_to_inputs(&self, output: &Rect, inputs: &mut [Rect]) -> Result<()> {
            for input in inputs {
                *input = *output;
            }
            Ok(())
        }

        fn map_invalid_output(&self, _input_index: u32, invalid_input: &Rect) -> Result<Rect> {
            Ok(*invalid_input)
        }
    }

    struct Panicking;

    impl TransformMapping for Panicking {
        fn map_inputs_to_output(
            &self,
            _context: &mut DrawInfoUpdateContext<'_>,
            _inputs: &[Rect],
            _opaque_inputs: &[Rect],
        ) -> Result<(Rect, Rect)> {
            panic!("mapping failed");
        }

        fn map_output_to_inputs(&self, _output: &Rect, _inputs: &mut [Rect]) -> Result<()> {
            Err(EffectError::InvalidArgument("no inputs"))
        }

        fn map_invalid_output(&self, _input_index: u32, _invalid_input: &Rect) -> Result<Rect> {
            Ok(Rect::INFINITE)
        }
    }

    fn sole_reference(mapper: &TransformMapper) -> bool {
        mapper.handle.is_reference_count_one()
    }

    #[test]
    fn test_capability_query() {
        let mapper = TransformMapper::new(Inflate { radius: 1 });
        assert!(mapper.query_capability(&IUnknown::IID).is_ok());
        let surface = mapper.query_capability(&ITransformMapper::IID).unwrap();
        let identity = mapper.native().cast::<IUnknown>().unwrap();
        assert_eq!(surface.cast::<IUnknown>().unwrap(), identity);
        assert_eq!(
            mapper
                .query_capability(&GUID::from_u128(0x1234))
                .unwrap_err(),
            EffectError::Host(E_NOINTERFACE)
        );
        assert_eq!(
            mapper.query_capability(&DYNAMIC_CAST_IID).unwrap_err(),
            EffectError::Host(E_NOINTERFACE)
        );
    }

    #[test]
    fn test_calls_forward_to_policy() {
        let mapper = TransformMapper::new(Inflate { radius: 2 });
        let native = TransformMapperRef::new(mapper.native());

        let mut buffer = [0u8; 8];
        let mut context = DrawInfoUpdateContext::new(&mut buffer);
        let input = Rect::new(0, 0, 10, 10);
        let (output, _) = native
            .map_inputs_to_output(&mut context, &[input], &[Rect::default()])
            .unwrap();
        assert_eq!(output, Rect::new(-2, -2, 12, 12));
        assert_eq!(bytemuck::cast::<[u8; 8], [i32; 2]>(buffer), [2, 1]);

        let mut inputs = [Rect::default(); 2];
        native.map_output_to_inputs(&output, &mut inputs).unwrap();
        assert_eq!(inputs, [output, output]);

        assert_eq!(native.map_invalid_output(0, &input).unwrap(), input);
    }

    #[test]
    fn test_reference_counting() {
        let mapper = TransformMapper::new(Inflate { radius: 0 });
        assert!(sole_reference(&mapper));
        let a = mapper.native();
        let b = a.clone();
        assert!(!sole_reference(&mapper));
        drop(a);
        drop(b);
        assert!(sole_reference(&mapper));
    }

    #[test]
    fn test_owner_dropped_while_host_holds_handle() {
        let mapper = TransformMapper::new(Inflate { radius: 1 });
        let native = TransformMapperRef::new(mapper.native());
        assert_eq!(native.attachment_state(), Some(AttachmentState::Attached));

        drop(mapper);

        assert_eq!(native.attachment_state(), Some(AttachmentState::Unattached));
        assert_eq!(
            native.map_invalid_output(0, &Rect::default()).unwrap_err(),
            EffectError::Host(RO_E_CLOSED)
        );
    }

    #[test]
    fn test_policy_kept_alive_elsewhere() {
        let policy: Arc<dyn TransformMapping> = Arc::new(Inflate { radius: 3 });
        let mapper = TransformMapper::from_arc(Arc::clone(&policy));
        let native = TransformMapperRef::new(mapper.native());
        drop(mapper);

        assert_eq!(native.attachment_state(), Some(AttachmentState::Attached));
        let rect = Rect::new(1, 2, 3, 4);
        assert_eq!(native.map_invalid_output(0, &rect).unwrap(), rect);
        drop(policy);
        assert_eq!(native.attachment_state(), Some(AttachmentState::Unattached));
    }

    #[test]
    fn test_panic_does_not_cross_boundary() {
        let mapper = TransformMapper::new(Panicking);
        let native = TransformMapperRef::new(mapper.native());
        let mut buffer: [u8; 0] = [];
        let mut context = DrawInfoUpdateContext::new(&mut buffer);
        assert_eq!(
            native
                .map_inputs_to_output(&mut context, &[], &[])
                .unwrap_err(),
            EffectError::Host(E_FAIL)
        );
        assert_eq!(
            native
                .map_output_to_inputs(&Rect::default(), &mut [])
                .unwrap_err(),
            EffectError::Host(E_INVALIDARG)
        );
    }

    #[test]
    fn test_null_pointers_rejected() {
        let mapper = TransformMapper::new(Inflate { radius: 0 });
        let native = mapper.native();
        // SAFETY: null outputs are rejected before any write.
        let result = unsafe { native.MapInvalidRect(0, ptr::null(), ptr::null_mut()) };
        assert_eq!(result.map_err(|e| e.code()), Err(E_POINTER));

        let input = Rect::default();
        let result = unsafe { native.MapOutputRectToInputRects(&input, ptr::null_mut(), 2) };
        assert_eq!(result.map_err(|e| e.code()), Err(E_POINTER));
    }

    #[test]
    fn test_attachment_through_unknown() {
        let mapper = TransformMapper::new(Inflate { radius: 0 });
        let unknown: IUnknown = mapper.native().cast().unwrap();
        let view = TransformMapperRef::from_unknown(&unknown).unwrap();
        assert_eq!(view.attachment_state(), Some(AttachmentState::Attached));

        let unowned: IUnknown = ComObject::new(MapperHandle {
            owner: SpinLock::new(None),
        })
        .to_interface();
        let view = TransformMapperRef::from_unknown(&unowned).unwrap();
        assert_eq!(view.attachment_state(), Some(AttachmentState::Unattached));
    }

    #[test]
    fn test_concurrent_handout() {
        let mapper = TransformMapper::new(Inflate { radius: 1 });
        std::thread::scope(|scope| {
            for _ in 0..16 {
                scope.spawn(|| {
                    for i in 0..200 {
                        let view = TransformMapperRef::new(mapper.native());
                        let rect = Rect::new(i, i, i + 1, i + 1);
                        assert_eq!(view.map_invalid_output(0, &rect).unwrap(), rect);
                    }
                });
            }
        });
        assert!(sole_reference(&mapper));
    }
}
