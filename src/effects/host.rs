//! The host compositor as seen from this crate.

use windows_core::GUID;

use super::properties::PropertyBinding;
use super::state::EffectFactoryFn;
use crate::error::Result;

/// Entry points of a compositor that accepts custom effects.
pub trait EffectHost {
    type Effect: HostEffect;

    /// Registers `class_id` with its property XML and binding table. The host
    /// creates effect objects through `factory` from then on.
    fn register_effect_from_string(
        &self,
        class_id: &GUID,
        property_xml: &str,
        bindings: &[PropertyBinding],
        factory: EffectFactoryFn,
    ) -> Result<()>;

    fn unregister_effect(&self, class_id: &GUID) -> Result<()>;

    fn create_effect(&self, class_id: &GUID) -> Result<Self::Effect>;
}

/// A host-side effect instance with indexed, untyped property access.
pub trait HostEffect {
    fn set_value(&self, index: u32, data: &[u8]) -> Result<()>;

    /// Reads property `index` into `data`, returning the number of bytes
    /// written.
    fn get_value(&self, index: u32, data: &mut [u8]) -> Result<usize>;
}
