use ash::vk;
use vireo_gpu::RenderDevice;
use vireo_render::PresentationSurface;
use vireo_test::{FaultPoint, HandleKind, MockDevice, Op};

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

#[test]
fn images_views_and_framebuffers_stay_in_step() {
    let device = MockDevice::new(800, 600);
    let mut surface = PresentationSurface::new(true);

    assert!(surface.create(&device, extent(800, 600)).unwrap());
    let state = surface.state().unwrap();
    assert_eq!(state.image_count(), 3);
    assert_eq!(state.images().len(), state.views().len());
    assert_eq!(state.views().len(), state.framebuffers().len());
    assert_eq!(state.extent(), extent(800, 600));
    assert_eq!(state.format().format, vk::Format::B8G8R8A8_SRGB);
    assert_eq!(state.present_mode(), vk::PresentModeKHR::FIFO);

    surface.destroy(&device).unwrap();
    assert!(!surface.is_ready());
    assert_eq!(device.live_count(), 0);
    device.assert_clean();
}

#[test]
fn rebuild_at_same_extent_is_idempotent() {
    let device = MockDevice::new(640, 480);
    let mut surface = PresentationSurface::new(false);
    surface.create(&device, device.drawable_extent()).unwrap();
    let baseline = device.live_by_kind();
    let format = surface.state().unwrap().format();

    for _ in 0..2 {
        assert!(surface.rebuild(&device, device.drawable_extent()).unwrap());
        let state = surface.state().unwrap();
        assert_eq!(state.extent(), extent(640, 480));
        assert_eq!(state.format(), format);
        assert_eq!(state.framebuffers().len(), state.images().len());
        assert_eq!(device.live_by_kind(), baseline);
    }
    assert_eq!(surface.generation(), 3);

    surface.destroy(&device).unwrap();
    assert_eq!(device.created(HandleKind::Swapchain), 3);
    assert_eq!(device.destroyed(HandleKind::Swapchain), 3);
    assert_eq!(device.live_count(), 0);
    device.assert_clean();
}

#[test]
fn rebuild_follows_the_window_size() {
    let device = MockDevice::new(800, 600);
    let mut surface = PresentationSurface::new(true);
    surface.create(&device, device.drawable_extent()).unwrap();

    device.set_extent(1024, 768);
    assert!(surface.rebuild(&device, device.drawable_extent()).unwrap());
    assert_eq!(surface.extent(), Some(extent(1024, 768)));

    surface.destroy(&device).unwrap();
    device.assert_clean();
}

#[test]
fn zero_sized_extent_defers_creation() {
    let device = MockDevice::new(800, 0);
    let mut surface = PresentationSurface::new(true);

    assert!(!surface.create(&device, device.drawable_extent()).unwrap());
    assert!(!surface.is_ready());
    assert_eq!(device.created(HandleKind::Swapchain), 0);
    assert!(!device
        .ops()
        .iter()
        .any(|op| matches!(op, Op::CreateSwapchain { .. })));

    device.set_extent(800, 600);
    assert!(surface.create(&device, device.drawable_extent()).unwrap());
    assert_eq!(surface.extent(), Some(extent(800, 600)));

    surface.destroy(&device).unwrap();
    device.assert_clean();
}

#[test]
fn minimizing_during_rebuild_leaves_surface_empty() {
    let device = MockDevice::new(800, 600);
    let mut surface = PresentationSurface::new(true);
    surface.create(&device, device.drawable_extent()).unwrap();

    device.set_extent(0, 0);
    assert!(!surface.rebuild(&device, device.drawable_extent()).unwrap());
    assert!(surface.state().is_none());
    assert_eq!(device.live_count(), 0);

    device.set_extent(320, 200);
    assert!(surface.rebuild(&device, device.drawable_extent()).unwrap());
    assert_eq!(surface.extent(), Some(extent(320, 200)));

    surface.destroy(&device).unwrap();
    device.assert_clean();
}

#[test]
fn failed_creation_releases_partial_state() {
    let device = MockDevice::new(800, 600);
    device.inject_fault(FaultPoint::CreateImageView, 1);
    let mut surface = PresentationSurface::new(true);

    assert!(surface.create(&device, device.drawable_extent()).is_err());
    assert!(!surface.is_ready());
    assert_eq!(device.live_count(), 0);
    device.assert_clean();

    assert!(surface.create(&device, device.drawable_extent()).unwrap());
    surface.destroy(&device).unwrap();
    device.assert_clean();
}

#[test]
fn creating_twice_is_rejected() {
    let device = MockDevice::new(800, 600);
    let mut surface = PresentationSurface::new(true);
    surface.create(&device, device.drawable_extent()).unwrap();
    assert!(surface.create(&device, device.drawable_extent()).is_err());
    assert_eq!(device.live_of(HandleKind::Swapchain), 1);
    surface.destroy(&device).unwrap();
}
