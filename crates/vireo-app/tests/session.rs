use std::collections::HashSet;

use ash::vk::{self, Handle};
use vireo_app::{
    AppConfig, AppContext, FrameContext, FrameOutcome, FrameState, RenderApp, Session, SkipReason,
    WindowEvent,
};
use vireo_core::{PixelRegion, UniformFrameData, Vertex};
use vireo_gpu::{DeviceImage, RenderDevice};
use vireo_render::{Mesh, PipelineDesc};
use vireo_test::{content_hash, AcquireScript, HandleKind, MockDevice, Op};
use winit::dpi::PhysicalSize;

const SPIRV: &[u32] = &[0x0723_0203, 0x0001_0000];

const TRIANGLE: [Vertex; 3] = [
    Vertex::new([0.0, -0.5, 0.0], [0.5, 0.0], [0.0, 0.0, 1.0]),
    Vertex::new([0.5, 0.5, 0.0], [1.0, 1.0], [0.0, 0.0, 1.0]),
    Vertex::new([-0.5, 0.5, 0.0], [0.0, 1.0], [0.0, 0.0, 1.0]),
];

/// 4x4 RGBA texture refreshed every frame.
const STREAM_REGION: PixelRegion = PixelRegion::packed(4, 4, 4);

/// Records every callback the session makes.
#[derive(Default)]
struct Probe {
    log: Vec<String>,
    mesh: Option<Mesh<MockDevice>>,
    upload_mesh: bool,
    fail_load: bool,
    fail_draw_at: Option<u64>,
    stream_texture: bool,
    bind_in_draw: bool,
    cleaned_up: bool,
}

impl RenderApp<MockDevice> for Probe {
    fn pipeline(&self, _config: &AppConfig) -> PipelineDesc {
        PipelineDesc::new(SPIRV.to_vec(), SPIRV.to_vec())
    }

    fn load(&mut self, ctx: &mut AppContext<MockDevice>) -> anyhow::Result<()> {
        if self.fail_load {
            anyhow::bail!("missing asset");
        }
        if self.upload_mesh {
            self.mesh = Some(ctx.upload_mesh(&TRIANGLE, &[0, 1, 2], "triangle")?);
        }
        if self.stream_texture {
            let texture =
                ctx.upload_texture(&[0; 64], STREAM_REGION, vk::Format::R8G8B8A8_UNORM, "live")?;
            ctx.bind_texture(texture)?;
        }
        Ok(())
    }

    fn draw(
        &mut self,
        ctx: &mut AppContext<MockDevice>,
        frame: &FrameContext,
    ) -> anyhow::Result<()> {
        self.log
            .push(format!("draw {}x{}", frame.extent.width, frame.extent.height));
        if self.fail_draw_at == Some(frame.frame_number) {
            anyhow::bail!("draw failed");
        }
        ctx.write_uniforms(frame, &UniformFrameData::default())?;
        if self.bind_in_draw {
            let texture =
                ctx.upload_texture(&[0; 64], STREAM_REGION, vk::Format::R8G8B8A8_UNORM, "late")?;
            ctx.bind_texture(texture)?;
        }
        if self.stream_texture {
            ctx.stream_bound_texture(&[frame.frame_number as u8 + 1; 64], STREAM_REGION)?;
        }
        if let Some(mesh) = &self.mesh {
            ctx.draw_mesh(frame, mesh, 1);
        }
        Ok(())
    }

    fn event(&mut self, _ctx: &mut AppContext<MockDevice>, event: &WindowEvent) {
        let name = match event {
            WindowEvent::Focused(focused) => format!("focused {focused}"),
            WindowEvent::Resized(size) => format!("resized {}x{}", size.width, size.height),
            other => format!("{other:?}"),
        };
        self.log.push(format!("event {name}"));
    }

    fn resize(
        &mut self,
        _ctx: &mut AppContext<MockDevice>,
        width: u32,
        height: u32,
    ) -> anyhow::Result<()> {
        self.log.push(format!("resize {width}x{height}"));
        Ok(())
    }

    fn cleanup(&mut self, ctx: &mut AppContext<MockDevice>) {
        if let Some(mesh) = self.mesh.take() {
            mesh.destroy(ctx.device());
        }
        self.cleaned_up = true;
    }
}

fn start(device: &MockDevice, app: Probe) -> Session<MockDevice, Probe> {
    Session::initialize(
        device.clone(),
        AppConfig::new("session test").with_size(800, 600),
        app,
    )
    .unwrap()
}

fn assert_released(device: &MockDevice) {
    assert!(device.is_shut_down());
    assert_eq!(device.live_count(), 0, "{:?}", device.live_by_kind());
    device.assert_clean();
}

fn sync_fences(session: &Session<MockDevice, Probe>) -> HashSet<u64> {
    let frames = session.frames().unwrap();
    (0..frames.frames_in_flight())
        .filter_map(|slot| frames.fence(slot))
        .map(|fence| fence.as_raw())
        .collect()
}

#[test]
fn single_frame_then_shutdown_leaks_nothing() {
    let device = MockDevice::new(800, 600);
    let mut session = start(&device, Probe::default());

    let mut iterations = 0;
    session
        .run_loop(|_| {
            iterations += 1;
            iterations <= 1
        })
        .unwrap();

    assert_eq!(session.stats().presented, 1);
    assert_eq!(session.app().log, ["draw 800x600"]);
    assert_eq!(device.presented_extents().len(), 1);

    session.shutdown().unwrap();
    assert!(session.is_shut_down());
    assert_released(&device);
}

#[test]
fn out_of_date_acquire_skips_the_draw_and_rebuilds() {
    let device = MockDevice::new(800, 600);
    let mut session = start(&device, Probe::default());
    let window = device.clone();

    let mut iteration = 0;
    session
        .run_loop(|_| {
            iteration += 1;
            if iteration == 3 {
                window.set_extent(1024, 768);
            }
            iteration <= 4
        })
        .unwrap();

    assert_eq!(
        session.app().log,
        [
            "draw 800x600",
            "draw 800x600",
            "resize 1024x768",
            "draw 1024x768",
        ]
    );
    let stats = *session.stats();
    assert_eq!((stats.presented, stats.skipped, stats.rebuilds), (3, 1, 1));
    assert_eq!(
        device.presented_extents().last(),
        Some(&vk::Extent2D {
            width: 1024,
            height: 768
        })
    );
    assert_eq!(
        session.context().unwrap().extent(),
        Some(vk::Extent2D {
            width: 1024,
            height: 768
        })
    );

    let ops = device.ops();
    let out_of_date = ops
        .iter()
        .position(|op| *op == Op::Acquire(vireo_gpu::AcquireStatus::OutOfDate))
        .unwrap();
    let next_submit = ops[out_of_date..]
        .iter()
        .position(|op| matches!(op, Op::Submit { .. }))
        .unwrap();
    let recreated = ops[out_of_date..]
        .iter()
        .position(|op| matches!(op, Op::CreateSwapchain { .. }))
        .unwrap();
    assert!(recreated < next_submit);

    session.shutdown().unwrap();
    assert_released(&device);
}

#[test]
fn frame_fences_are_waited_before_reset() {
    let device = MockDevice::new(800, 600);
    let mut session = start(&device, Probe::default());
    let fences = sync_fences(&session);
    device.clear_ops();

    for _ in 0..6 {
        assert_eq!(session.frame().unwrap(), FrameOutcome::Presented);
    }

    let mut waited = HashSet::new();
    let mut resets = 0;
    for op in device.ops() {
        match op {
            Op::WaitFence(fence) => {
                waited.insert(fence);
            }
            Op::ResetFence(fence) if fences.contains(&fence) => {
                assert!(waited.remove(&fence), "fence #{fence} reset without a wait");
                resets += 1;
            }
            _ => {}
        }
    }
    assert_eq!(resets, 6);
    device.assert_clean();

    session.shutdown().unwrap();
    assert_released(&device);
}

#[test]
fn fence_is_reset_only_after_a_successful_acquire() {
    let device = MockDevice::new(800, 600);
    device.script_acquire(2, AcquireScript::OutOfDate);
    let mut session = start(&device, Probe::default());
    let fences = sync_fences(&session);

    assert_eq!(session.frame().unwrap(), FrameOutcome::Presented);
    assert_eq!(
        session.frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::OutOfDate)
    );
    assert_eq!(session.frame().unwrap(), FrameOutcome::Presented);

    let resets = device
        .ops()
        .iter()
        .filter(|op| matches!(op, Op::ResetFence(f) if fences.contains(f)))
        .count();
    assert_eq!(resets, 2);
    assert_eq!(session.app().log.len(), 3);

    session.shutdown().unwrap();
    assert_released(&device);
}

#[test]
fn suboptimal_acquire_draws_then_rebuilds() {
    let device = MockDevice::new(800, 600);
    device.script_acquire(1, AcquireScript::Suboptimal);
    let mut session = start(&device, Probe::default());

    assert_eq!(session.frame().unwrap(), FrameOutcome::Presented);
    assert_eq!(session.stats().rebuilds, 1);
    assert_eq!(session.frames().unwrap().state(), FrameState::Idle);
    let swapchains = device
        .ops()
        .iter()
        .filter(|op| matches!(op, Op::CreateSwapchain { .. }))
        .count();
    assert_eq!(swapchains, 2);

    assert_eq!(session.frame().unwrap(), FrameOutcome::Presented);
    assert_eq!(
        session.app().log,
        ["draw 800x600", "resize 800x600", "draw 800x600"]
    );

    session.shutdown().unwrap();
    assert_released(&device);
}

#[test]
fn events_wait_for_an_acquired_image() {
    let device = MockDevice::new(800, 600);
    let mut session = start(&device, Probe::default());

    device.set_extent(0, 0);
    session.event(WindowEvent::Focused(true));
    assert_eq!(
        session.frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::ZeroExtent)
    );
    assert!(session.app().log.is_empty());

    // Restoring the size invalidates the swapchain: the acquire fails and
    // the queued event is still held back.
    device.set_extent(800, 600);
    assert_eq!(
        session.frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::OutOfDate)
    );
    assert!(session.app().log.is_empty());

    assert_eq!(session.frame().unwrap(), FrameOutcome::Presented);
    assert_eq!(
        session.app().log,
        ["resize 800x600", "event focused true", "draw 800x600"]
    );

    session.shutdown().unwrap();
    assert_released(&device);
}

#[test]
fn resize_event_rebuilds_before_the_next_acquire() {
    let device = MockDevice::new(800, 600);
    let mut session = start(&device, Probe::default());
    assert_eq!(session.frame().unwrap(), FrameOutcome::Presented);

    device.set_extent(1024, 768);
    session.event(WindowEvent::Resized(PhysicalSize::new(1024, 768)));
    assert_eq!(session.frames().unwrap().state(), FrameState::Rebuilding);
    assert_eq!(session.frame().unwrap(), FrameOutcome::Presented);

    assert_eq!(
        session.app().log,
        [
            "draw 800x600",
            "resize 1024x768",
            "event resized 1024x768",
            "draw 1024x768",
        ]
    );
    assert!(!device
        .ops()
        .contains(&Op::Acquire(vireo_gpu::AcquireStatus::OutOfDate)));

    session.shutdown().unwrap();
    assert_released(&device);
}

#[test]
fn minimized_start_defers_the_surface() {
    let device = MockDevice::new(0, 0);
    let mut session = start(&device, Probe::default());

    for _ in 0..3 {
        assert_eq!(
            session.frame().unwrap(),
            FrameOutcome::Skipped(SkipReason::ZeroExtent)
        );
    }
    assert!(!device
        .ops()
        .iter()
        .any(|op| matches!(op, Op::CreateSwapchain { .. })));
    assert_eq!(device.acquire_calls(), 0);

    device.set_extent(640, 480);
    assert_eq!(session.frame().unwrap(), FrameOutcome::Presented);
    assert_eq!(session.app().log, ["resize 640x480", "draw 640x480"]);
    assert_eq!(
        device.presented_extents(),
        [vk::Extent2D {
            width: 640,
            height: 480
        }]
    );

    session.shutdown().unwrap();
    assert_released(&device);
}

#[test]
fn dropping_a_session_shuts_it_down() {
    let device = MockDevice::new(800, 600);
    {
        let mut session = start(
            &device,
            Probe {
                upload_mesh: true,
                ..Probe::default()
            },
        );
        session.frame().unwrap();
        session.frame().unwrap();
    }
    assert_released(&device);
}

#[test]
fn shutdown_runs_once() {
    let device = MockDevice::new(800, 600);
    let mut session = start(&device, Probe::default());
    session.frame().unwrap();

    session.shutdown().unwrap();
    session.shutdown().unwrap();
    assert!(session.app().cleaned_up);
    assert!(session.frame().is_err());
    drop(session);

    let shutdowns = device
        .ops()
        .iter()
        .filter(|op| **op == Op::Shutdown)
        .count();
    assert_eq!(shutdowns, 1);
    assert_released(&device);
}

#[test]
fn retired_mesh_outlives_its_frames() {
    let device = MockDevice::new(800, 600);
    let mut session = start(
        &device,
        Probe {
            upload_mesh: true,
            ..Probe::default()
        },
    );
    session.frame().unwrap();
    let live_buffers = device.live_of(HandleKind::Buffer);

    let mesh = session.app_mut().mesh.take().unwrap();
    session.context_mut().unwrap().destroy_mesh(mesh);
    assert_eq!(session.context().unwrap().retired_count(), 2);

    session.frame().unwrap();
    session.frame().unwrap();
    assert_eq!(session.context().unwrap().retired_count(), 2);
    assert_eq!(device.live_of(HandleKind::Buffer), live_buffers);

    session.frame().unwrap();
    assert_eq!(session.context().unwrap().retired_count(), 0);
    assert_eq!(device.live_of(HandleKind::Buffer), live_buffers - 2);
    device.assert_clean();

    session.shutdown().unwrap();
    assert_released(&device);
}

#[test]
fn bound_texture_is_streamed_in_place() {
    let device = MockDevice::new(800, 600);
    let mut session = start(
        &device,
        Probe {
            stream_texture: true,
            ..Probe::default()
        },
    );
    let image = session
        .context()
        .unwrap()
        .binder()
        .texture()
        .unwrap()
        .image()
        .handle();
    let images = device.created(HandleKind::Image);

    for _ in 0..3 {
        session.frame().unwrap();
    }
    device.wait_idle().unwrap();

    assert_eq!(
        content_hash(&device.image_contents(image).unwrap()),
        content_hash(&[3; 64])
    );
    assert_eq!(
        device.image_layout(image),
        Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    );
    assert_eq!(device.created(HandleKind::Image), images);
    device.assert_clean();

    session.shutdown().unwrap();
    assert_released(&device);
}

#[test]
fn texture_rebind_inside_draw_is_refused() {
    let device = MockDevice::new(800, 600);
    let mut session = start(
        &device,
        Probe {
            bind_in_draw: true,
            ..Probe::default()
        },
    );
    let images = device.live_of(HandleKind::Image);
    device.clear_ops();

    let err = session.frame().unwrap_err();
    assert!(format!("{err:#}").contains("bind_texture"));
    assert!(!device
        .ops()
        .iter()
        .any(|op| matches!(op, Op::UpdateDescriptor { .. })));
    // The frame was still handed back and the rejected texture released.
    assert_eq!(device.presented_extents().len(), 1);
    assert_eq!(device.live_of(HandleKind::Image), images);
    device.assert_clean();

    session.shutdown().unwrap();
    assert_released(&device);
}

#[test]
fn failed_load_releases_everything() {
    let device = MockDevice::new(800, 600);
    let result = Session::initialize(
        device.clone(),
        AppConfig::new("broken"),
        Probe {
            fail_load: true,
            ..Probe::default()
        },
    );
    let err = result.err().unwrap();
    assert!(format!("{err:#}").contains("missing asset"));
    assert_released(&device);
}

#[test]
fn invalid_config_is_rejected_before_any_allocation() {
    let device = MockDevice::new(800, 600);
    let result = Session::initialize(
        device.clone(),
        AppConfig::new("bad").with_frames_in_flight(0),
        Probe::default(),
    );
    assert!(result.is_err());
    assert_eq!(device.created(HandleKind::Buffer), 0);
    assert_released(&device);
}

#[test]
fn failed_draw_still_hands_the_frame_back() {
    let device = MockDevice::new(800, 600);
    let mut session = start(
        &device,
        Probe {
            fail_draw_at: Some(1),
            ..Probe::default()
        },
    );

    session.frame().unwrap();
    let err = session.frame().unwrap_err();
    assert!(format!("{err:#}").contains("draw failed"));
    assert_eq!(device.presented_extents().len(), 2);

    session.shutdown().unwrap();
    assert_released(&device);
}

#[test]
fn frames_in_flight_are_clamped_to_the_swap_images() {
    let device = MockDevice::new(800, 600).with_image_counts(1, 2);
    let mut session = Session::initialize(
        device.clone(),
        AppConfig::new("clamp").with_frames_in_flight(3),
        Probe::default(),
    )
    .unwrap();
    assert_eq!(session.frames().unwrap().frames_in_flight(), 2);

    for _ in 0..5 {
        assert_eq!(session.frame().unwrap(), FrameOutcome::Presented);
    }
    session.shutdown().unwrap();
    assert_released(&device);
}

#[test]
fn minimized_start_clamps_frames_in_flight_once_the_surface_exists() {
    let device = MockDevice::new(0, 0).with_image_counts(1, 2);
    let mut session = Session::initialize(
        device.clone(),
        AppConfig::new("clamp later").with_frames_in_flight(3),
        Probe::default(),
    )
    .unwrap();
    assert_eq!(session.frames().unwrap().frames_in_flight(), 3);
    let fences = device.live_of(HandleKind::Fence);

    device.set_extent(640, 480);
    for _ in 0..4 {
        assert_eq!(session.frame().unwrap(), FrameOutcome::Presented);
    }
    assert_eq!(session.frames().unwrap().frames_in_flight(), 2);
    assert_eq!(device.live_of(HandleKind::Fence), fences - 1);
    device.assert_clean();

    session.shutdown().unwrap();
    assert_released(&device);
}

#[test]
fn quit_stops_the_loop() {
    let device = MockDevice::new(800, 600);
    let mut session = start(&device, Probe::default());

    let mut iteration = 0;
    session
        .run_loop(|events| {
            iteration += 1;
            if iteration == 3 {
                events.push(WindowEvent::CloseRequested);
            }
            iteration < 10
        })
        .unwrap();

    assert!(session.quit_requested());
    assert_eq!(session.stats().presented, 2);
    session.shutdown().unwrap();
    assert_released(&device);
}

#[test]
fn frame_transitions() {
    let device = MockDevice::new(800, 600);
    device.script_acquire(2, AcquireScript::OutOfDate);
    let mut session = start(&device, Probe::default());

    for _ in 0..3 {
        session.frame().unwrap();
    }
    let transitions = session
        .frames()
        .unwrap()
        .history()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n");

    insta::assert_snapshot!(transitions, @r"
    #0 Idle -> Acquiring
    #0 Acquiring -> Recording
    #0 Recording -> Submitted
    #0 Submitted -> Presenting
    #1 Presenting -> Idle
    #1 Idle -> Acquiring
    #1 Acquiring -> Rebuilding
    #1 Rebuilding -> Idle
    #1 Idle -> Acquiring
    #1 Acquiring -> Recording
    #1 Recording -> Submitted
    #1 Submitted -> Presenting
    #2 Presenting -> Idle
    ");

    session.shutdown().unwrap();
    assert_released(&device);
}
