use ash::vk::{self, Handle};
use vireo_core::{RenderMode, UniformFrameData};
use vireo_gpu::{DeviceBuffer, DeviceFeatures, DeviceImage, GpuError, RenderDevice};
use vireo_render::{
    packed_region, DescriptorLayoutDesc, PipelineBinder, PipelineDesc, PresentationSurface,
    Uploader,
};
use vireo_test::{HandleKind, MockDevice, Op};

const SPIRV: &[u32] = &[0x0723_0203, 0x0001_0000];

struct Fixture {
    device: MockDevice,
    uploader: Uploader,
    surface: PresentationSurface<MockDevice>,
    binder: PipelineBinder<MockDevice>,
}

impl Fixture {
    fn new(device: MockDevice, desc: PipelineDesc) -> Self {
        let uploader = Uploader::new(&device).unwrap();
        let mut surface = PresentationSurface::new(true);
        surface.create(&device, device.drawable_extent()).unwrap();
        let mut binder = PipelineBinder::new(&device, &uploader, desc, 16).unwrap();
        binder.build(&device, surface.state().unwrap()).unwrap();
        Self {
            device,
            uploader,
            surface,
            binder,
        }
    }

    fn standard() -> Self {
        Self::new(
            MockDevice::new(800, 600),
            PipelineDesc::new(SPIRV.to_vec(), SPIRV.to_vec()).with_modes(&RenderMode::ALL),
        )
    }

    fn teardown(self) -> MockDevice {
        let Self {
            mut device,
            uploader,
            mut surface,
            binder,
        } = self;
        binder.destroy(&device);
        surface.destroy(&device).unwrap();
        uploader.destroy(&device);
        device.shutdown();
        device
    }
}

#[test]
fn build_allocates_one_set_and_uniform_per_image() {
    let fx = Fixture::standard();
    let resource = fx.binder.resource().unwrap();
    let image_count = fx.surface.state().unwrap().image_count();

    assert_eq!(resource.descriptor_sets().len(), image_count);
    assert_eq!(resource.uniform_buffers().len(), image_count);
    assert!(resource.pipeline(RenderMode::Fill).is_some());
    assert!(resource.pipeline(RenderMode::Wireframe).is_some());
    assert_eq!(
        resource.render_pass(),
        fx.surface.state().unwrap().render_pass()
    );

    let placeholder = fx.binder.texture().unwrap();
    assert_eq!((placeholder.width(), placeholder.height()), (1, 1));
    for (set, uniform) in resource
        .descriptor_sets()
        .iter()
        .zip(resource.uniform_buffers())
    {
        assert_eq!(
            fx.device.descriptor_target(*set, 0),
            Some(placeholder.view().as_raw())
        );
        assert_eq!(
            fx.device.descriptor_target(*set, 1),
            Some(uniform.handle().as_raw())
        );
    }

    let device = fx.teardown();
    assert_eq!(device.live_count(), 0);
    device.assert_clean();
}

#[test]
fn rebinding_a_texture_destroys_the_old_one_first() {
    let mut fx = Fixture::standard();
    let format = vk::Format::R8G8B8A8_SRGB;

    let first = fx
        .uploader
        .upload_texture(
            &fx.device,
            &[0x40; 64],
            packed_region(4, 4, format).unwrap(),
            format,
            "slot",
        )
        .unwrap();
    fx.binder.bind_texture(&fx.device, first).unwrap();
    let old_image = fx.binder.texture().unwrap().image().handle().as_raw();
    let old_view = fx.binder.texture().unwrap().view().as_raw();

    let second = fx
        .uploader
        .upload_texture(
            &fx.device,
            &[0x80; 64],
            packed_region(8, 2, format).unwrap(),
            format,
            "slot",
        )
        .unwrap();
    let new_view = second.view().as_raw();

    fx.device.clear_ops();
    fx.binder.bind_texture(&fx.device, second).unwrap();
    let ops = fx.device.ops();

    let destroyed_view = ops
        .iter()
        .position(|op| *op == Op::Destroy(HandleKind::ImageView, old_view))
        .unwrap();
    let destroyed_image = ops
        .iter()
        .position(|op| *op == Op::Destroy(HandleKind::Image, old_image))
        .unwrap();
    let first_update = ops
        .iter()
        .position(|op| matches!(op, Op::UpdateDescriptor { .. }))
        .unwrap();
    assert!(destroyed_view < destroyed_image);
    assert!(destroyed_image < first_update);

    for op in &ops {
        if let Op::UpdateDescriptor {
            binding: 0, target, ..
        } = op
        {
            assert_eq!(*target, new_view);
        }
    }
    for set in fx.binder.resource().unwrap().descriptor_sets() {
        assert_eq!(fx.device.descriptor_target(*set, 0), Some(new_view));
    }
    // Depth attachment plus the bound texture.
    assert_eq!(fx.device.live_of(HandleKind::Image), 2);
    fx.device.assert_clean();

    let device = fx.teardown();
    assert_eq!(device.live_count(), 0);
    device.assert_clean();
}

#[test]
fn wireframe_is_skipped_without_device_support() {
    let device = MockDevice::new(800, 600).with_features(DeviceFeatures {
        max_anisotropy: None,
        wireframe: false,
    });
    let mut fx = Fixture::new(
        device,
        PipelineDesc::new(SPIRV.to_vec(), SPIRV.to_vec()).with_modes(&RenderMode::ALL),
    );

    let resource = fx.binder.resource().unwrap();
    assert!(resource.pipeline(RenderMode::Wireframe).is_none());
    assert_eq!(fx.device.live_of(HandleKind::Pipeline), 1);

    assert!(!fx.binder.set_mode(RenderMode::Wireframe));
    assert_eq!(fx.binder.mode(), RenderMode::Fill);

    let device = fx.teardown();
    device.assert_clean();
}

#[test]
fn mode_switch_changes_the_bound_pipeline() {
    let mut fx = Fixture::standard();
    assert!(fx.binder.set_mode(RenderMode::Wireframe));
    let wireframe = fx
        .binder
        .resource()
        .unwrap()
        .pipeline(RenderMode::Wireframe)
        .unwrap();

    let pool = fx.device.create_command_pool(false).unwrap();
    let cb = fx.device.allocate_command_buffers(pool, 1).unwrap()[0];
    let state = fx.surface.state().unwrap();
    fx.device.begin_command_buffer(cb, false).unwrap();
    fx.device.record(
        cb,
        vireo_gpu::Command::BeginRenderPass {
            render_pass: state.render_pass(),
            framebuffer: state.framebuffers()[0],
            extent: state.extent(),
            clear_color: [0.0; 4],
            clear_depth: 1.0,
        },
    );
    fx.binder.record_bind(&fx.device, cb, 0);
    fx.device.record(cb, vireo_gpu::Command::EndRenderPass);
    fx.device.end_command_buffer(cb).unwrap();

    assert!(fx
        .device
        .recorded(cb)
        .contains(&vireo_test::Recorded::BindPipeline(wireframe.as_raw())));
    fx.device.destroy_command_pool(pool);

    let device = fx.teardown();
    device.assert_clean();
}

#[test]
fn surface_rebuild_then_build_does_not_leak() {
    let mut fx = Fixture::standard();
    let baseline = fx.device.live_by_kind();

    for size in [(1024, 768), (800, 600), (800, 600)] {
        fx.device.set_extent(size.0, size.1);
        fx.binder.release(&fx.device);
        assert!(fx
            .surface
            .rebuild(&fx.device, fx.device.drawable_extent())
            .unwrap());
        fx.binder
            .build(&fx.device, fx.surface.state().unwrap())
            .unwrap();
        assert_eq!(
            fx.binder.resource().unwrap().extent(),
            vk::Extent2D {
                width: size.0,
                height: size.1
            }
        );
        assert_eq!(fx.device.live_by_kind(), baseline);
    }

    let device = fx.teardown();
    assert_eq!(device.live_count(), 0);
    device.assert_clean();
}

#[test]
fn empty_shader_fails_the_build_cleanly() {
    let device = MockDevice::new(800, 600);
    let uploader = Uploader::new(&device).unwrap();
    let mut surface = PresentationSurface::new(true);
    surface.create(&device, device.drawable_extent()).unwrap();

    let mut binder =
        PipelineBinder::new(&device, &uploader, PipelineDesc::new(Vec::new(), SPIRV.to_vec()), 4)
            .unwrap();
    let result = binder.build(&device, surface.state().unwrap());
    assert!(matches!(result, Err(GpuError::ShaderCompilation(_))));
    assert!(binder.resource().is_none());
    assert_eq!(device.live_of(HandleKind::Pipeline), 0);
    assert_eq!(device.live_of(HandleKind::DescriptorPool), 0);

    binder.destroy(&device);
    surface.destroy(&device).unwrap();
    uploader.destroy(&device);
    assert_eq!(device.live_count(), 0);
    device.assert_clean();
}

#[test]
fn uniform_only_layout_has_no_sampler_or_placeholder() {
    let layout = DescriptorLayoutDesc {
        texture_binding: None,
        ..DescriptorLayoutDesc::default()
    };
    let fx = Fixture::new(
        MockDevice::new(800, 600),
        PipelineDesc::new(SPIRV.to_vec(), SPIRV.to_vec()).with_descriptor_layout(layout),
    );
    assert!(fx.binder.texture().is_none());
    assert_eq!(fx.device.live_of(HandleKind::Sampler), 0);

    let data = UniformFrameData::default();
    fx.binder.write_uniforms(&fx.device, 1, &data).unwrap();
    let uniform = &fx.binder.resource().unwrap().uniform_buffers()[1];
    assert_eq!(
        fx.device.buffer_contents(uniform.handle()).unwrap(),
        data.as_bytes()
    );
    assert!(fx.binder.write_uniforms(&fx.device, 9, &data).is_err());

    let device = fx.teardown();
    device.assert_clean();
}

#[test]
fn texture_binding_is_required_for_bind_texture() {
    let layout = DescriptorLayoutDesc {
        texture_binding: None,
        ..DescriptorLayoutDesc::default()
    };
    let mut fx = Fixture::new(
        MockDevice::new(800, 600),
        PipelineDesc::new(SPIRV.to_vec(), SPIRV.to_vec()).with_descriptor_layout(layout),
    );
    let format = vk::Format::R8_UNORM;
    let texture = fx
        .uploader
        .upload_texture(
            &fx.device,
            &[1; 4],
            packed_region(2, 2, format).unwrap(),
            format,
            "mask",
        )
        .unwrap();
    assert!(fx.binder.bind_texture(&fx.device, texture).is_err());
    // The rejected texture is released rather than leaked.
    assert_eq!(fx.device.live_of(HandleKind::Image), 1);

    let device = fx.teardown();
    device.assert_clean();
}

#[test]
fn push_constants_outside_the_block_are_rejected() {
    let fx = Fixture::new(
        MockDevice::new(800, 600),
        PipelineDesc::new(SPIRV.to_vec(), SPIRV.to_vec()).with_push_constants(64),
    );
    let pool = fx.device.create_command_pool(false).unwrap();
    let cb = fx.device.allocate_command_buffers(pool, 1).unwrap()[0];
    fx.device.begin_command_buffer(cb, false).unwrap();

    fx.binder
        .record_push_constants(&fx.device, cb, &[7; 64])
        .unwrap();
    for bad in [&[][..], &[0; 6][..], &[0; 68][..]] {
        assert!(matches!(
            fx.binder.record_push_constants(&fx.device, cb, bad),
            Err(GpuError::InvalidState(_))
        ));
    }
    fx.device.end_command_buffer(cb).unwrap();
    assert_eq!(
        fx.device.recorded(cb),
        [vireo_test::Recorded::PushConstants(vec![7; 64])]
    );
    fx.device.destroy_command_pool(pool);

    let device = fx.teardown();
    device.assert_clean();
}
