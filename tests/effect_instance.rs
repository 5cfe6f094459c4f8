mod common;

use std::sync::Arc;

use common::{Blend, BlendConstants, InMemoryHost, Noise, RecordingContext};
use effect_bridge::EffectError;
use effect_bridge::effects::{
    ComputeShaderProperty, EffectInstance, EffectRegistry, EffectState, HostEffect,
    PixelShaderProperty,
};
use effect_bridge::mapper::{DrawInfoUpdateContext, Rect, TransformMapper, TransformMapping};
use effect_bridge::native::{E_INVALIDARG, RO_E_CLOSED};
use effect_bridge::texture::{
    BufferPrecision, ChannelDepth, EffectContext, ExtendMode, ResourceTextureDescriptor,
    ResourceTextureManager,
};
use windows_core::{IUnknown, Interface};

fn host() -> InMemoryHost {
    let host = InMemoryHost::default();
    let mut registry = EffectRegistry::new();
    registry.register::<Blend, _>(&host).unwrap();
    registry.register::<Noise, _>(&host).unwrap();
    host
}

fn lut() -> ResourceTextureManager {
    let ramp: Vec<u8> = (0..=255).collect();
    ResourceTextureManager::new(
        ResourceTextureDescriptor::new(vec![256], vec![ExtendMode::Clamp])
            .with_format(BufferPrecision::UInt8Normalized, ChannelDepth::One)
            .with_data(ramp, vec![]),
    )
    .unwrap()
}

/// Shifts the output right by the blend mode stored in the constant buffer.
struct Shift;

impl TransformMapping for Shift {
    fn map_inputs_to_output(
        &self,
        context: &mut DrawInfoUpdateContext<'_>,
        inputs: &[Rect],
        _opaque_inputs: &[Rect],
    ) -> effect_bridge::Result<(Rect, Rect)> {
        let mut constants: BlendConstants = context.constants()?;
        let shift = constants.mode as i32;
        constants.amount = 1.0;
        context.set_constants(&constants)?;
        let input = inputs[0];
        Ok((
            Rect::new(input.left + shift, input.top, input.right + shift, input.bottom),
            Rect::default(),
        ))
    }

    fn map_output_to_inputs(
        &self,
        output: &Rect,
        inputs: &mut [Rect],
    ) -> effect_bridge::Result<()> {
        inputs.fill(*output);
        Ok(())
    }

    fn map_invalid_output(
        &self,
        _input_index: u32,
        invalid_input: &Rect,
    ) -> effect_bridge::Result<Rect> {
        Ok(*invalid_input)
    }
}

#[test]
fn constants_round_trip_through_host() {
    let host = host();
    let instance = EffectInstance::<Blend, _>::create(&host).unwrap();
    let constants = BlendConstants {
        amount: 0.5,
        mode: 2,
        _pad: [0; 2],
    };
    instance.set_constants(&constants).unwrap();
    assert_eq!(instance.constants().unwrap(), constants);

    let noise = EffectInstance::<Noise, _>::create(&host).unwrap();
    noise.update(&Noise { seed: 42 }).unwrap();
    assert_eq!(noise.constants().unwrap(), 42);
}

#[test]
fn wrong_constant_buffer_size_rejected_by_host_path() {
    let host = host();
    let instance = EffectInstance::<Blend, _>::create(&host).unwrap();
    assert_eq!(
        instance
            .as_raw()
            .set_value(PixelShaderProperty::CONSTANT_BUFFER, &[0; 3]),
        Err(EffectError::Host(E_INVALIDARG))
    );
}

#[test]
fn resource_texture_managers_materialize_when_bound() {
    let host = host();
    let instance = EffectInstance::<Blend, _>::create(&host).unwrap();
    let early = lut();
    instance.set_resource_texture_manager(0, Some(&early)).unwrap();
    assert!(matches!(
        instance.set_resource_texture_manager(16, Some(&early)),
        Err(EffectError::InvalidArgument(_))
    ));

    let state = EffectState::from_unknown(&instance.as_raw().native).unwrap();
    assert!(state.resource_textures().unwrap().is_empty());

    let recording = Arc::new(RecordingContext::default());
    let context: Arc<dyn EffectContext> = recording.clone();
    state.bind_context(context).unwrap();
    assert!(early.is_materialized());
    assert_eq!(recording.created.lock().unwrap()[0].extents, vec![256]);

    let late = lut();
    instance.set_resource_texture_manager(15, Some(&late)).unwrap();
    assert!(late.is_materialized());

    let slots: Vec<usize> = state
        .resource_textures()
        .unwrap()
        .into_iter()
        .map(|(slot, _)| slot)
        .collect();
    assert_eq!(slots, vec![0, 15]);

    instance.set_resource_texture_manager(0, None).unwrap();
    assert_eq!(state.resource_textures().unwrap().len(), 1);
}

#[test]
fn manager_reads_back_through_getter() {
    let host = host();
    let instance = EffectInstance::<Noise, _>::create(&host).unwrap();
    let manager = lut();
    instance.set_resource_texture_manager(3, Some(&manager)).unwrap();

    let index = ComputeShaderProperty::resource_texture_manager(3).unwrap();
    let mut bytes = [0u8; size_of::<usize>()];
    assert_eq!(
        instance.as_raw().get_value(index, &mut bytes).unwrap(),
        size_of::<usize>()
    );
    let native = unsafe { IUnknown::from_raw(usize::from_ne_bytes(bytes) as *mut _) };
    assert_eq!(native, IUnknown::from(manager.native()));
}

#[test]
fn transform_mapper_drives_constant_buffer() {
    let host = host();
    let instance = EffectInstance::<Blend, _>::create(&host).unwrap();
    let mapper = TransformMapper::new(Shift);
    instance.set_transform_mapper(Some(&mapper)).unwrap();
    instance
        .update(&Blend {
            amount: 0.0,
            mode: 5,
        })
        .unwrap();

    let state = EffectState::from_unknown(&instance.as_raw().native).unwrap();
    let input = Rect::new(0, 0, 10, 10);
    let (output, _) = state
        .map_inputs_to_output(&[input, input], &[Rect::default(); 2])
        .unwrap();
    assert_eq!(output, Rect::new(5, 0, 15, 10));
    assert_eq!(instance.constants().unwrap().amount, 1.0);

    drop(mapper);
    assert_eq!(
        state.map_invalid_output(0, &input),
        Err(EffectError::Host(RO_E_CLOSED))
    );

    instance.set_transform_mapper(None).unwrap();
    assert_eq!(state.map_invalid_output(0, &input), Ok(input));
}

#[test]
fn mapper_handout_is_thread_safe() {
    let mapper = TransformMapper::new(Shift);
    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..100 {
                    let native = mapper.native();
                    let again = native.clone();
                    assert_eq!(again, native);
                }
            });
        }
    });
}
