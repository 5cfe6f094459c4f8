//! The fixed property table shared by every effect.
//!
//! | index   | name                          | type       |
//! |---------|-------------------------------|------------|
//! | 0       | `ConstantBuffer`              | `blob`     |
//! | 1..=16  | `ResourceTextureManager0..15` | `iunknown` |
//! | 17      | `TransformMapper`             | `iunknown` |
//!
//! Interface-typed values travel as one pointer-sized value. Writing null
//! clears the slot; reading hands out an added reference.

use std::borrow::Cow;
use std::ffi::c_void;
use std::mem::size_of;
use std::ptr;

use const_format::concatcp;
use windows_core::{HRESULT, IUnknown, Interface};

use super::state::EffectState;
use super::traits::{EffectKind, PropertyType};

use crate::mapper::ITransformMapper;
use crate::native::{
    E_INVALIDARG, E_NOT_SUFFICIENT_BUFFER, E_POINTER, E_UNEXPECTED, catch_native, slice_from_raw,
};
use crate::texture::IResourceTextureManager;

pub const PROPERTY_COUNT: usize = 18;
pub const RESOURCE_TEXTURE_MANAGER_COUNT: usize = 16;

pub const CONSTANT_BUFFER_NAME: &str = "ConstantBuffer";
pub const RESOURCE_TEXTURE_MANAGER_PREFIX: &str = "ResourceTextureManager";
pub const TRANSFORM_MAPPER_NAME: &str = "TransformMapper";

/// Reads a property value. Reports the value's size through `actual_size`
/// and fails with `E_NOT_SUFFICIENT_BUFFER`, writing nothing into `data`,
/// when `data_size` is too small.
pub type PropertyGetFn = unsafe extern "system" fn(
    effect: *mut c_void,
    data: *mut u8,
    data_size: u32,
    actual_size: *mut u32,
) -> HRESULT;

pub type PropertySetFn =
    unsafe extern "system" fn(effect: *mut c_void, data: *const u8, data_size: u32) -> HRESULT;

/// One entry of the table handed to the host at registration.
#[derive(Clone)]
pub struct PropertyBinding {
    pub name: Cow<'static, str>,
    pub getter: Option<PropertyGetFn>,
    pub setter: Option<PropertySetFn>,
}

impl PropertyBinding {
    pub const fn new(name: &'static str, getter: PropertyGetFn, setter: PropertySetFn) -> Self {
        Self {
            name: Cow::Borrowed(name),
            getter: Some(getter),
            setter: Some(setter),
        }
    }

    pub fn getter_address(&self) -> usize {
        self.getter.map_or(0, |getter| getter as usize)
    }

    pub fn setter_address(&self) -> usize {
        self.setter.map_or(0, |setter| setter as usize)
    }
}

impl PartialEq for PropertyBinding {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.getter_address() == other.getter_address()
            && self.setter_address() == other.setter_address()
    }
}

impl Eq for PropertyBinding {}

impl std::fmt::Debug for PropertyBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyBinding")
            .field("name", &self.name)
            .field("getter", &format_args!("{:#x}", self.getter_address()))
            .field("setter", &format_args!("{:#x}", self.setter_address()))
            .finish()
    }
}

macro_rules! property_xml {
    ($name:expr, $ty:expr) => {
        concatcp!(
            "    <Property name='",
            $name,
            "' type='",
            $ty,
            "'>\n        <Property name='DisplayName' type='string' value='",
            $name,
            "'/>\n    </Property>\n"
        )
    };
}

macro_rules! property_table {
    ($($slot:literal),+ $(,)?) => {
        /// Bindings in index order.
        pub static BINDING_TABLE: [PropertyBinding; PROPERTY_COUNT] = [
            PropertyBinding::new(CONSTANT_BUFFER_NAME, get_constant_buffer, set_constant_buffer),
            $(
                PropertyBinding::new(
                    concatcp!(RESOURCE_TEXTURE_MANAGER_PREFIX, stringify!($slot)),
                    get_resource_texture_manager::<$slot>,
                    set_resource_texture_manager::<$slot>,
                ),
            )+
            PropertyBinding::new(
                TRANSFORM_MAPPER_NAME,
                get_transform_mapper,
                set_transform_mapper,
            ),
        ];

        /// `<Property>` elements for the table, in index order.
        pub const PROPERTIES_XML: &str = concatcp!(
            property_xml!(CONSTANT_BUFFER_NAME, PropertyType::Blob.as_str()),
            $(
                property_xml!(
                    concatcp!(RESOURCE_TEXTURE_MANAGER_PREFIX, stringify!($slot)),
                    PropertyType::IUnknown.as_str()
                ),
            )+
            property_xml!(TRANSFORM_MAPPER_NAME, PropertyType::IUnknown.as_str()),
        );
    };
}

property_table!(0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15);

macro_rules! property_indices {
    ($($(#[$meta:meta])* $kind:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy)]
            pub struct $kind;

            impl $kind {
                pub const CONSTANT_BUFFER: u32 = 0;
                pub const TRANSFORM_MAPPER: u32 = 1 + RESOURCE_TEXTURE_MANAGER_COUNT as u32;

                /// Property index of resource texture manager `slot`.
                pub const fn resource_texture_manager(slot: u32) -> Option<u32> {
                    if slot < RESOURCE_TEXTURE_MANAGER_COUNT as u32 {
                        Some(1 + slot)
                    } else {
                        None
                    }
                }
            }
        )+
    };
}

property_indices! {
    /// Property indices of pixel shader effects.
    PixelShaderProperty,
    /// Property indices of compute shader effects.
    ComputeShaderProperty,
}

impl EffectKind {
    pub const fn constant_buffer_index(self) -> u32 {
        match self {
            EffectKind::PixelShader => PixelShaderProperty::CONSTANT_BUFFER,
            EffectKind::ComputeShader => ComputeShaderProperty::CONSTANT_BUFFER,
        }
    }

    pub const fn resource_texture_manager_index(self, slot: u32) -> Option<u32> {
        match self {
            EffectKind::PixelShader => PixelShaderProperty::resource_texture_manager(slot),
            EffectKind::ComputeShader => ComputeShaderProperty::resource_texture_manager(slot),
        }
    }

    pub const fn transform_mapper_index(self) -> u32 {
        match self {
            EffectKind::PixelShader => PixelShaderProperty::TRANSFORM_MAPPER,
            EffectKind::ComputeShader => ComputeShaderProperty::TRANSFORM_MAPPER,
        }
    }
}

/// Copies `value` out under the getter contract.
unsafe fn write_value(
    value: &[u8],
    data: *mut u8,
    data_size: u32,
    actual_size: *mut u32,
) -> windows_core::Result<()> {
    let len = u32::try_from(value.len()).map_err(|_| E_UNEXPECTED)?;
    unsafe {
        if !actual_size.is_null() {
            *actual_size = len;
        }
        if data_size < len {
            return Err(E_NOT_SUFFICIENT_BUFFER.into());
        }
        if len > 0 {
            if data.is_null() {
                return Err(E_POINTER.into());
            }
            ptr::copy_nonoverlapping(value.as_ptr(), data, value.len());
        }
    }
    Ok(())
}

const INTERFACE_SIZE: u32 = size_of::<*mut c_void>() as u32;

/// Writes an added reference to `value`, or null.
unsafe fn write_interface(
    value: Option<IUnknown>,
    data: *mut u8,
    data_size: u32,
    actual_size: *mut u32,
) -> windows_core::Result<()> {
    unsafe {
        if !actual_size.is_null() {
            *actual_size = INTERFACE_SIZE;
        }
        if data_size < INTERFACE_SIZE {
            return Err(E_NOT_SUFFICIENT_BUFFER.into());
        }
        if data.is_null() {
            return Err(E_POINTER.into());
        }
        let raw = value.map_or(ptr::null_mut(), Interface::into_raw);
        ptr::write_unaligned(data as *mut *mut c_void, raw);
    }
    Ok(())
}

/// Reads a borrowed pointer and casts it to `I`. Null reads as `None`.
unsafe fn read_interface<I: Interface>(
    data: *const u8,
    data_size: u32,
) -> windows_core::Result<Option<I>> {
    if data_size != INTERFACE_SIZE {
        return Err(E_INVALIDARG.into());
    }
    if data.is_null() {
        return Err(E_POINTER.into());
    }
    let raw = unsafe { ptr::read_unaligned(data as *const *mut c_void) };
    unsafe { IUnknown::from_raw_borrowed(&raw) }
        .map(Interface::cast::<I>)
        .transpose()
}

unsafe extern "system" fn get_constant_buffer(
    effect: *mut c_void,
    data: *mut u8,
    data_size: u32,
    actual_size: *mut u32,
) -> HRESULT {
    catch_native("get ConstantBuffer", || unsafe {
        let state = EffectState::from_effect_ptr(effect)?;
        write_value(&state.constant_buffer(), data, data_size, actual_size)
    })
    .into()
}

unsafe extern "system" fn set_constant_buffer(
    effect: *mut c_void,
    data: *const u8,
    data_size: u32,
) -> HRESULT {
    catch_native("set ConstantBuffer", || unsafe {
        let state = EffectState::from_effect_ptr(effect)?;
        let bytes = slice_from_raw(data, data_size as usize)?;
        Ok(state.set_constant_buffer(bytes)?)
    })
    .into()
}

unsafe extern "system" fn get_resource_texture_manager<const SLOT: usize>(
    effect: *mut c_void,
    data: *mut u8,
    data_size: u32,
    actual_size: *mut u32,
) -> HRESULT {
    catch_native("get ResourceTextureManager", || unsafe {
        let state = EffectState::from_effect_ptr(effect)?;
        let manager = state.resource_texture_manager(SLOT)?;
        write_interface(manager.map(IUnknown::from), data, data_size, actual_size)
    })
    .into()
}

unsafe extern "system" fn set_resource_texture_manager<const SLOT: usize>(
    effect: *mut c_void,
    data: *const u8,
    data_size: u32,
) -> HRESULT {
    catch_native("set ResourceTextureManager", || unsafe {
        let state = EffectState::from_effect_ptr(effect)?;
        let manager = read_interface::<IResourceTextureManager>(data, data_size)?;
        Ok(state.set_resource_texture_manager(SLOT, manager.as_ref())?)
    })
    .into()
}

unsafe extern "system" fn get_transform_mapper(
    effect: *mut c_void,
    data: *mut u8,
    data_size: u32,
    actual_size: *mut u32,
) -> HRESULT {
    catch_native("get TransformMapper", || unsafe {
        let state = EffectState::from_effect_ptr(effect)?;
        let mapper = state
            .transform_mapper()
            .map(|mapper| IUnknown::from(mapper.as_interface()));
        write_interface(mapper, data, data_size, actual_size)
    })
    .into()
}

unsafe extern "system" fn set_transform_mapper(
    effect: *mut c_void,
    data: *const u8,
    data_size: u32,
) -> HRESULT {
    catch_native("set TransformMapper", || unsafe {
        let state = EffectState::from_effect_ptr(effect)?;
        let mapper = read_interface::<ITransformMapper>(data, data_size)?;
        Ok(state.set_transform_mapper(mapper.as_ref())?)
    })
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows_core::GUID;

    use crate::mapper::{DrawInfoUpdateContext, Rect, TransformMapper, TransformMapping};
    use crate::native::{E_NOINTERFACE, S_OK};
    use crate::texture::{ExtendMode, ResourceTextureDescriptor, ResourceTextureManager};

    struct Identity;

    impl TransformMapping for Identity {
        fn map_inputs_to_output(
            &self,
            _context: &mut DrawInfoUpdateContext<'_>,
            inputs: &[Rect],
            _opaque_inputs: &[Rect],
        ) -> crate::Result<(Rect, Rect)> {
            Ok((inputs[0], Rect::default()))
        }

        fn map_output_to_inputs(&self, output: &Rect, inputs: &mut [Rect]) -> crate::Result<()> {
            inputs.fill(*output);
            Ok(())
        }

        fn map_invalid_output(
            &self,
            _input_index: u32,
            invalid_input: &Rect,
        ) -> crate::Result<Rect> {
            Ok(*invalid_input)
        }
    }

    fn get(state: &EffectState, index: usize, buffer: &mut [u8]) -> (HRESULT, u32) {
        let mut actual = 0;
        let getter = BINDING_TABLE[index].getter.unwrap();
        let hr = unsafe {
            getter(
                state.native().as_raw(),
                buffer.as_mut_ptr(),
                buffer.len() as u32,
                &mut actual,
            )
        };
        (hr, actual)
    }

    fn set(state: &EffectState, index: usize, bytes: &[u8]) -> HRESULT {
        let setter = BINDING_TABLE[index].setter.unwrap();
        unsafe { setter(state.native().as_raw(), bytes.as_ptr(), bytes.len() as u32) }
    }

    fn pointer_bytes(native: &impl Interface) -> Vec<u8> {
        (native.as_raw() as usize).to_ne_bytes().to_vec()
    }

    #[test]
    fn test_table_layout() {
        assert_eq!(BINDING_TABLE.len(), PROPERTY_COUNT);
        assert_eq!(BINDING_TABLE[0].name, "ConstantBuffer");
        assert_eq!(BINDING_TABLE[1].name, "ResourceTextureManager0");
        assert_eq!(BINDING_TABLE[16].name, "ResourceTextureManager15");
        assert_eq!(BINDING_TABLE[17].name, "TransformMapper");
        assert!(BINDING_TABLE.iter().all(|b| b.getter.is_some() && b.setter.is_some()));
        assert_ne!(
            BINDING_TABLE[1].getter_address(),
            BINDING_TABLE[2].getter_address()
        );
    }

    #[test]
    fn test_properties_xml() {
        assert_eq!(PROPERTIES_XML.matches("<Property name='ResourceTextureManager").count(), 16);
        assert!(PROPERTIES_XML.contains("<Property name='ConstantBuffer' type='blob'>"));
        assert!(PROPERTIES_XML.contains("<Property name='TransformMapper' type='iunknown'>"));
        assert!(
            PROPERTIES_XML.find("ResourceTextureManager9'").unwrap()
                < PROPERTIES_XML.find("ResourceTextureManager10'").unwrap()
        );
    }

    #[test]
    fn test_indices_agree_across_kinds() {
        for kind in [EffectKind::PixelShader, EffectKind::ComputeShader] {
            assert_eq!(kind.constant_buffer_index(), 0);
            assert_eq!(kind.resource_texture_manager_index(0), Some(1));
            assert_eq!(kind.resource_texture_manager_index(15), Some(16));
            assert_eq!(kind.resource_texture_manager_index(16), None);
            assert_eq!(kind.transform_mapper_index(), 17);
        }
    }

    #[test]
    fn test_constant_buffer_property() {
        let state = EffectState::new(GUID::from_u128(1), 4);
        assert_eq!(set(&state, 0, &[1, 2, 3, 4]), S_OK);
        assert_eq!(set(&state, 0, &[1, 2, 3]), E_INVALIDARG);

        let mut small = [0xAA; 2];
        assert_eq!(get(&state, 0, &mut small), (E_NOT_SUFFICIENT_BUFFER, 4));
        assert_eq!(small, [0xAA; 2]);

        let mut buffer = [0; 8];
        assert_eq!(get(&state, 0, &mut buffer), (S_OK, 4));
        assert_eq!(&buffer[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_resource_texture_manager_property() {
        let state = EffectState::new(GUID::from_u128(2), 0);
        let manager = ResourceTextureManager::new(ResourceTextureDescriptor::new(
            vec![2, 2],
            vec![ExtendMode::Wrap, ExtendMode::Wrap],
        ))
        .unwrap();
        let native = manager.native();
        assert_eq!(set(&state, 4, &pointer_bytes(&native)), S_OK);

        let mut buffer = [0u8; size_of::<usize>()];
        assert_eq!(get(&state, 4, &mut buffer), (S_OK, INTERFACE_SIZE));
        let read = unsafe { IUnknown::from_raw(usize::from_ne_bytes(buffer) as *mut c_void) };
        assert_eq!(read, IUnknown::from(&native));

        assert_eq!(get(&state, 5, &mut buffer), (S_OK, INTERFACE_SIZE));
        assert_eq!(usize::from_ne_bytes(buffer), 0);

        assert_eq!(set(&state, 4, &0usize.to_ne_bytes()), S_OK);
        assert!(state.resource_texture_manager(3).unwrap().is_none());

        let mapper = TransformMapper::new(Identity);
        assert_eq!(
            set(&state, 4, &pointer_bytes(&mapper.native())),
            E_NOINTERFACE
        );
        assert_eq!(set(&state, 4, &[0; 3]), E_INVALIDARG);
    }

    #[test]
    fn test_transform_mapper_property() {
        let state = EffectState::new(GUID::from_u128(3), 0);
        let mapper = TransformMapper::new(Identity);
        assert_eq!(set(&state, 17, &pointer_bytes(&mapper.native())), S_OK);
        assert!(state.transform_mapper().is_some());

        let mut small = [0u8; 2];
        assert_eq!(
            get(&state, 17, &mut small),
            (E_NOT_SUFFICIENT_BUFFER, INTERFACE_SIZE)
        );

        let manager = ResourceTextureManager::new(ResourceTextureDescriptor::new(
            vec![2],
            vec![ExtendMode::Clamp],
        ))
        .unwrap();
        assert_eq!(
            set(&state, 17, &pointer_bytes(&manager.native())),
            E_NOINTERFACE
        );
    }

    #[test]
    fn test_foreign_effect_pointer() {
        let mapper = TransformMapper::new(Identity);
        let native = mapper.native();
        let setter = BINDING_TABLE[0].setter.unwrap();
        assert_eq!(
            unsafe { setter(native.as_raw(), ptr::null(), 0) },
            E_NOINTERFACE
        );
        assert_eq!(
            unsafe { setter(ptr::null_mut(), ptr::null(), 0) },
            E_POINTER
        );
    }
}
