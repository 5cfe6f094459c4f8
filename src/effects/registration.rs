//! Effect registration.
//!
//! The registration data for an effect type is built once per process and
//! memoized by class id. It can be handed to a host directly or encoded as
//! a [`RegistrationBlob`] and replayed by a loader that only sees bytes.

use std::any::TypeId;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use effect_bridge_core::{BindingRecord, RegistrationBlob};
use lazy_static::lazy_static;
use windows_core::GUID;

use super::host::EffectHost;
use super::properties::{
    BINDING_TABLE, PROPERTIES_XML, PropertyBinding, PropertyGetFn, PropertySetFn,
};
use super::state::EffectFactoryFn;
use super::traits::{EffectMetadata, ShaderEffect};
use crate::error::{EffectError, Result};

/// Everything a host needs to register one effect class.
#[derive(Clone)]
pub struct EffectRegistration {
    pub class_id: GUID,
    pub input_count: u32,
    pub property_xml: String,
    pub bindings: Vec<PropertyBinding>,
    pub factory: EffectFactoryFn,
}

struct MemoEntry {
    type_id: Option<TypeId>,
    registration: Arc<EffectRegistration>,
}

lazy_static! {
    static ref REGISTRATIONS: Mutex<HashMap<GUID, MemoEntry>> = Mutex::new(HashMap::new());
}

/// Returns the memoized registration for `class_id`, building it on first use.
/// A different shape under a known class id is a conflict.
fn memoize(
    class_id: GUID,
    type_id: Option<TypeId>,
    build: impl FnOnce() -> Result<EffectRegistration>,
) -> Result<Arc<EffectRegistration>> {
    let mut table = REGISTRATIONS.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(entry) = table.get(&class_id) {
        if type_id.is_some() && entry.type_id == type_id {
            log::debug!("registration for effect {class_id:?} served from the memo table");
            return Ok(Arc::clone(&entry.registration));
        }
        let candidate = build()?;
        if *entry.registration == candidate {
            return Ok(Arc::clone(&entry.registration));
        }
        log::warn!("effect {class_id:?} was registered again with a different shape");
        return Err(EffectError::ConflictingRegistration { class_id });
    }

    let registration = Arc::new(build()?);
    log::debug!(
        "built registration for effect {class_id:?} with {} inputs",
        registration.input_count
    );
    table.insert(
        class_id,
        MemoEntry {
            type_id,
            registration: Arc::clone(&registration),
        },
    );
    Ok(registration)
}

impl EffectRegistration {
    /// The memoized registration for `E`.
    pub fn for_effect<E: ShaderEffect>() -> Result<Arc<Self>> {
        memoize(E::CLSID, Some(TypeId::of::<E>()), || Ok(Self::build::<E>()))
    }

    fn build<E: ShaderEffect>() -> Self {
        Self {
            class_id: E::CLSID,
            input_count: E::INPUT_COUNT,
            property_xml: build_effect_xml(&E::metadata(), E::INPUT_COUNT),
            bindings: BINDING_TABLE.to_vec(),
            factory: E::effect_factory(),
        }
    }

    /// Address-level copy for the blob codec.
    pub fn to_blob(&self) -> RegistrationBlob {
        RegistrationBlob {
            class_id: self.class_id,
            input_count: self.input_count,
            property_xml: self.property_xml.clone(),
            bindings: self
                .bindings
                .iter()
                .map(|binding| BindingRecord {
                    name: binding.name.to_string(),
                    getter: binding.getter_address(),
                    setter: binding.setter_address(),
                })
                .collect(),
            factory: self.factory as usize,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = self.to_blob().encode()?;
        log::debug!(
            "encoded registration blob for effect {:?} ({} bytes)",
            self.class_id,
            bytes.len()
        );
        Ok(bytes)
    }

    /// Rebuilds a registration from blob addresses.
    ///
    /// # Safety
    ///
    /// The addresses must come from [`EffectRegistration::encode`] in this
    /// process; they are called as function pointers once registered.
    pub unsafe fn from_blob(blob: RegistrationBlob) -> Result<Self> {
        if blob.factory == 0 {
            return Err(EffectError::InvalidArgument(
                "registration blob has no factory address",
            ));
        }
        let bindings = blob
            .bindings
            .into_iter()
            .map(|record| PropertyBinding {
                name: Cow::Owned(record.name),
                // SAFETY: non-zero addresses are functions of these types per
                // the caller's contract.
                getter: (record.getter != 0)
                    .then(|| unsafe { std::mem::transmute::<usize, PropertyGetFn>(record.getter) }),
                setter: (record.setter != 0)
                    .then(|| unsafe { std::mem::transmute::<usize, PropertySetFn>(record.setter) }),
            })
            .collect();

        Ok(Self {
            class_id: blob.class_id,
            input_count: blob.input_count,
            property_xml: blob.property_xml,
            bindings,
            factory: unsafe { std::mem::transmute::<usize, EffectFactoryFn>(blob.factory) },
        })
    }

    /// # Safety
    ///
    /// See [`EffectRegistration::from_blob`].
    pub unsafe fn decode(bytes: &[u8]) -> Result<Self> {
        let blob = RegistrationBlob::decode(bytes)?;
        log::debug!("decoded registration blob for effect {:?}", blob.class_id);
        unsafe { Self::from_blob(blob) }
    }

    pub fn register_with<H: EffectHost>(&self, host: &H) -> Result<()> {
        host.register_effect_from_string(
            &self.class_id,
            &self.property_xml,
            &self.bindings,
            self.factory,
        )?;
        log::debug!("registered effect {:?} with the host", self.class_id);
        Ok(())
    }
}

impl PartialEq for EffectRegistration {
    fn eq(&self, other: &Self) -> bool {
        self.class_id == other.class_id
            && self.input_count == other.input_count
            && self.property_xml == other.property_xml
            && self.bindings == other.bindings
            && self.factory as usize == other.factory as usize
    }
}

impl Eq for EffectRegistration {}

impl std::fmt::Debug for EffectRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectRegistration")
            .field("class_id", &self.class_id)
            .field("input_count", &self.input_count)
            .field("property_xml", &self.property_xml)
            .field("bindings", &self.bindings)
            .field("factory", &format_args!("{:#x}", self.factory as usize))
            .finish()
    }
}

/// Encoded registration of `E`, for hand-off to a loader.
pub fn registration_blob<E: ShaderEffect>() -> Result<Vec<u8>> {
    EffectRegistration::for_effect::<E>()?.encode()
}

/// Tracks which effect classes have been registered with one host.
///
/// # Example
///
/// ```ignore
/// let mut registry = EffectRegistry::new();
/// registry.register::<GrayscaleEffect, _>(&host)?;
/// let instance = EffectInstance::<GrayscaleEffect, _>::create(&host)?;
/// ```
#[derive(Debug, Default)]
pub struct EffectRegistry {
    registered: HashSet<GUID>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self {
            registered: HashSet::new(),
        }
    }

    /// Registers `E` with `host`. Repeated calls are ignored.
    pub fn register<E: ShaderEffect, H: EffectHost>(&mut self, host: &H) -> Result<()> {
        if self.registered.contains(&E::CLSID) {
            return Ok(());
        }
        EffectRegistration::for_effect::<E>()?.register_with(host)?;
        self.registered.insert(E::CLSID);
        Ok(())
    }

    /// Decodes a blob and registers it with `host`.
    ///
    /// # Safety
    ///
    /// See [`EffectRegistration::from_blob`].
    pub unsafe fn register_blob<H: EffectHost>(&mut self, host: &H, bytes: &[u8]) -> Result<GUID> {
        let decoded = unsafe { EffectRegistration::decode(bytes)? };
        let class_id = decoded.class_id;
        let registration = memoize(class_id, None, move || Ok(decoded))?;
        if !self.registered.contains(&class_id) {
            registration.register_with(host)?;
            self.registered.insert(class_id);
        }
        Ok(class_id)
    }

    pub fn is_registered<E: ShaderEffect>(&self) -> bool {
        self.registered.contains(&E::CLSID)
    }

    pub fn is_class_registered(&self, class_id: &GUID) -> bool {
        self.registered.contains(class_id)
    }

    pub fn unregister<E: ShaderEffect, H: EffectHost>(&mut self, host: &H) -> Result<()> {
        self.unregister_class(host, &E::CLSID)
    }

    pub fn unregister_class<H: EffectHost>(&mut self, host: &H, class_id: &GUID) -> Result<()> {
        if !self.registered.contains(class_id) {
            return Ok(());
        }
        host.unregister_effect(class_id)?;
        self.registered.remove(class_id);
        Ok(())
    }

    /// Forgets every registration without telling the host, for when the
    /// host itself is going away.
    pub fn clear(&mut self) {
        self.registered.clear();
    }
}

fn escape_xml(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '\'', '"']) {
        return Cow::Borrowed(text);
    }
    let mut escaped = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\'' => escaped.push_str("&apos;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Builds the XML registration string for a custom effect.
fn build_effect_xml(metadata: &EffectMetadata, input_count: u32) -> String {
    let inputs: String = (0..input_count)
        .map(|i| format!("        <Input name='Source{i}'/>\n"))
        .collect();

    format!(
        r#"<?xml version='1.0'?>
<Effect>
    <Property name='DisplayName' type='string' value='{name}'/>
    <Property name='Author' type='string' value='{author}'/>
    <Property name='Category' type='string' value='{category}'/>
    <Property name='Description' type='string' value='{description}'/>
    <Inputs>
{inputs}    </Inputs>
{properties}</Effect>"#,
        name = escape_xml(metadata.name),
        author = escape_xml(metadata.author),
        category = escape_xml(metadata.category),
        description = escape_xml(metadata.description),
        inputs = inputs,
        properties = PROPERTIES_XML,
    )
}
