//! Bookkeeping [`RenderDevice`] double.
//!
//! Submissions are queued and only executed when something waits on them
//! (`wait_for_fence`, `queue_wait_idle`, `wait_idle`), so a caller that
//! forgets to wait observes stale memory exactly as it would on a GPU.
//! Misuse that a validation layer would flag is recorded as a violation
//! instead of failing the call.

use crate::ledger::{HandleKind, Ledger};
use crate::script::{AcquireScript, FaultPoint, Op};
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use vireo_core::BackendKind;
use vireo_gpu::image::texel_size;
use vireo_gpu::{
    AcquireStatus, Command, DescriptorBinding, DescriptorWrite, DeviceBuffer, DeviceFeatures,
    DeviceImage, GpuError, GraphicsPipelineConfig, ImageDesc, MemoryLocation, PresentStatus,
    RenderDevice, Result, SamplerDesc, Submission, SurfaceCapabilities, SwapchainDesc,
};

/// Buffer handed out by [`MockDevice`].
#[derive(Debug)]
pub struct MockBuffer {
    handle: vk::Buffer,
    size: u64,
}

impl DeviceBuffer for MockBuffer {
    fn handle(&self) -> vk::Buffer {
        self.handle
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Image handed out by [`MockDevice`].
#[derive(Debug)]
pub struct MockImage {
    handle: vk::Image,
    format: vk::Format,
    extent: vk::Extent3D,
}

impl DeviceImage for MockImage {
    fn handle(&self) -> vk::Image {
        self.handle
    }

    fn format(&self) -> vk::Format {
        self.format
    }

    fn extent(&self) -> vk::Extent3D {
        self.extent
    }
}

/// A command as stored in a mock command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    BeginRenderPass {
        render_pass: u64,
        framebuffer: u64,
        extent: vk::Extent2D,
    },
    EndRenderPass,
    SetViewport(vk::Extent2D),
    BindPipeline(u64),
    BindDescriptorSet {
        layout: u64,
        set: u64,
    },
    BindVertexBuffer(u64),
    BindIndexBuffer(u64),
    PushConstants(Vec<u8>),
    Draw {
        count: u32,
        instances: u32,
        indexed: bool,
    },
    CopyBuffer {
        src: u64,
        dst: u64,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToImage {
        src: u64,
        dst: u64,
        width: u32,
        height: u32,
        row_length: u32,
    },
    ImageBarrier {
        image: u64,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    },
    BufferBarrier(u64),
}

impl Recorded {
    fn from_command(command: Command<'_>) -> Self {
        match command {
            Command::BeginRenderPass {
                render_pass,
                framebuffer,
                extent,
                ..
            } => Self::BeginRenderPass {
                render_pass: render_pass.as_raw(),
                framebuffer: framebuffer.as_raw(),
                extent,
            },
            Command::EndRenderPass => Self::EndRenderPass,
            Command::SetViewport(extent) => Self::SetViewport(extent),
            Command::BindPipeline(pipeline) => Self::BindPipeline(pipeline.as_raw()),
            Command::BindDescriptorSet { layout, set } => Self::BindDescriptorSet {
                layout: layout.as_raw(),
                set: set.as_raw(),
            },
            Command::BindVertexBuffer(buffer) => Self::BindVertexBuffer(buffer.as_raw()),
            Command::BindIndexBuffer(buffer) => Self::BindIndexBuffer(buffer.as_raw()),
            Command::PushConstants { data, .. } => Self::PushConstants(data.to_vec()),
            Command::Draw {
                vertex_count,
                instance_count,
            } => Self::Draw {
                count: vertex_count,
                instances: instance_count,
                indexed: false,
            },
            Command::DrawIndexed {
                index_count,
                instance_count,
            } => Self::Draw {
                count: index_count,
                instances: instance_count,
                indexed: true,
            },
            Command::CopyBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            } => Self::CopyBuffer {
                src: src.as_raw(),
                dst: dst.as_raw(),
                src_offset,
                dst_offset,
                size,
            },
            Command::CopyBufferToImage {
                src,
                dst,
                width,
                height,
                row_length,
            } => Self::CopyBufferToImage {
                src: src.as_raw(),
                dst: dst.as_raw(),
                width,
                height,
                row_length,
            },
            Command::ImageBarrier {
                image,
                old_layout,
                new_layout,
                ..
            } => Self::ImageBarrier {
                image: image.as_raw(),
                old_layout,
                new_layout,
            },
            Command::BufferBarrier { buffer, .. } => Self::BufferBarrier(buffer.as_raw()),
        }
    }

    /// Handles the command reads or writes.
    fn references(&self) -> Vec<u64> {
        match *self {
            Self::BeginRenderPass {
                render_pass,
                framebuffer,
                ..
            } => vec![render_pass, framebuffer],
            Self::BindPipeline(h)
            | Self::BindVertexBuffer(h)
            | Self::BindIndexBuffer(h)
            | Self::BufferBarrier(h) => vec![h],
            Self::BindDescriptorSet { layout, set } => vec![layout, set],
            Self::CopyBuffer { src, dst, .. } | Self::CopyBufferToImage { src, dst, .. } => {
                vec![src, dst]
            }
            Self::ImageBarrier { image, .. } => vec![image],
            Self::EndRenderPass
            | Self::SetViewport(_)
            | Self::PushConstants(_)
            | Self::Draw { .. } => Vec::new(),
        }
    }
}

#[derive(Debug)]
struct BufferState {
    data: Vec<u8>,
    host_visible: bool,
}

#[derive(Debug)]
struct ImageState {
    width: u32,
    height: u32,
    texel: Option<u32>,
    data: Vec<u8>,
    layout: vk::ImageLayout,
}

#[derive(Debug)]
struct SwapchainState {
    images: Vec<u64>,
    extent: vk::Extent2D,
    next: u32,
    acquired: HashSet<u32>,
    stale: bool,
}

#[derive(Debug)]
struct FramebufferState {
    render_pass: u64,
    extent: vk::Extent2D,
}

#[derive(Debug, Default)]
struct CommandBufferState {
    pool: u64,
    recording: bool,
    commands: Vec<Recorded>,
    render_pass: Option<u64>,
}

#[derive(Debug)]
struct Pending {
    command_buffer: u64,
    fence: Option<u64>,
}

#[derive(Debug)]
struct State {
    ledger: Ledger,
    ops: Vec<Op>,
    violations: Vec<String>,

    extent: vk::Extent2D,
    min_image_count: u32,
    max_image_count: u32,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    features: DeviceFeatures,

    buffers: HashMap<u64, BufferState>,
    images: HashMap<u64, ImageState>,
    views: HashMap<u64, u64>,
    swapchains: HashMap<u64, SwapchainState>,
    swapchain_images: HashMap<u64, u64>,
    framebuffers: HashMap<u64, FramebufferState>,
    pipelines: HashMap<u64, u64>,
    descriptor_pools: HashMap<u64, (u32, Vec<u64>)>,
    set_bindings: HashMap<u64, BTreeMap<u32, u64>>,
    command_pools: HashMap<u64, Vec<u64>>,
    command_buffers: HashMap<u64, CommandBufferState>,
    semaphores: HashMap<u64, bool>,
    fences: HashMap<u64, bool>,
    pending: VecDeque<Pending>,

    acquire_calls: usize,
    present_calls: usize,
    acquire_script: HashMap<usize, AcquireScript>,
    present_script: HashMap<usize, PresentStatus>,
    faults: HashMap<FaultPoint, u32>,

    draw_calls: usize,
    presented: Vec<vk::Extent2D>,
    shut_down: bool,
}

impl State {
    fn new(width: u32, height: u32) -> Self {
        Self {
            ledger: Ledger::default(),
            ops: Vec::new(),
            violations: Vec::new(),
            extent: vk::Extent2D { width, height },
            min_image_count: 2,
            max_image_count: 3,
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            features: DeviceFeatures {
                max_anisotropy: Some(16.0),
                wireframe: true,
            },
            buffers: HashMap::new(),
            images: HashMap::new(),
            views: HashMap::new(),
            swapchains: HashMap::new(),
            swapchain_images: HashMap::new(),
            framebuffers: HashMap::new(),
            pipelines: HashMap::new(),
            descriptor_pools: HashMap::new(),
            set_bindings: HashMap::new(),
            command_pools: HashMap::new(),
            command_buffers: HashMap::new(),
            semaphores: HashMap::new(),
            fences: HashMap::new(),
            pending: VecDeque::new(),
            acquire_calls: 0,
            present_calls: 0,
            acquire_script: HashMap::new(),
            present_script: HashMap::new(),
            faults: HashMap::new(),
            draw_calls: 0,
            presented: Vec::new(),
            shut_down: false,
        }
    }

    fn violation(&mut self, message: String) {
        tracing::warn!("mock device violation: {message}");
        self.violations.push(message);
    }

    fn fault(&mut self, point: FaultPoint) -> Result<()> {
        if let Some(remaining) = self.faults.get_mut(&point) {
            if *remaining == 0 {
                self.faults.remove(&point);
                return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            *remaining -= 1;
        }
        Ok(())
    }

    fn create(&mut self, kind: HandleKind) -> u64 {
        let raw = self.ledger.create(kind);
        self.ops.push(Op::Create(kind, raw));
        raw
    }

    /// Every handle that queued GPU work still touches, including the
    /// resources bound through descriptor sets.
    fn pending_references(&self) -> HashSet<u64> {
        let mut refs = HashSet::new();
        for pending in &self.pending {
            refs.insert(pending.command_buffer);
            if let Some(cb) = self.command_buffers.get(&pending.command_buffer) {
                for command in &cb.commands {
                    for handle in command.references() {
                        refs.insert(handle);
                        if let Some(bindings) = self.set_bindings.get(&handle) {
                            refs.extend(bindings.values().copied());
                        }
                    }
                }
            }
        }
        refs
    }

    fn release(&mut self, raw: u64, kind: HandleKind) {
        self.ops.push(Op::Destroy(kind, raw));
        if self.pending_references().contains(&raw) {
            self.violation(format!(
                "{kind} #{raw} destroyed while pending GPU work uses it"
            ));
        }
        if let Err(message) = self.ledger.destroy(raw, kind) {
            self.violation(message);
        }
    }

    fn is_pending(&self, command_buffer: u64) -> bool {
        self.pending
            .iter()
            .any(|p| p.command_buffer == command_buffer)
    }

    fn resolves(&self, raw: u64) -> bool {
        self.ledger.contains(raw) || self.swapchain_images.contains_key(&raw)
    }

    fn check_set_targets(&mut self, set: u64, context: &str) {
        let dead: Vec<(u32, u64)> = self
            .set_bindings
            .get(&set)
            .map(|bindings| {
                bindings
                    .iter()
                    .filter(|(_, target)| !self.ledger.contains(**target))
                    .map(|(binding, target)| (*binding, *target))
                    .collect()
            })
            .unwrap_or_default();
        for (binding, target) in dead {
            self.violation(format!(
                "{context}: descriptor set #{set} binding {binding} references destroyed #{target}"
            ));
        }
    }

    fn execute_front(&mut self) {
        let Some(pending) = self.pending.pop_front() else {
            return;
        };
        let commands = self
            .command_buffers
            .get(&pending.command_buffer)
            .map(|cb| cb.commands.clone())
            .unwrap_or_default();
        for command in commands {
            self.execute(&command);
        }
        if let Some(fence) = pending.fence {
            self.fences.insert(fence, true);
        }
    }

    fn execute(&mut self, command: &Recorded) {
        match *command {
            Recorded::CopyBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            } => {
                let Some(bytes) = self.buffers.get(&src).and_then(|b| {
                    let start = usize::try_from(src_offset).ok()?;
                    let end = start.checked_add(usize::try_from(size).ok()?)?;
                    b.data.get(start..end).map(<[u8]>::to_vec)
                }) else {
                    self.violation(format!("copy reads outside buffer #{src}"));
                    return;
                };
                let written = self.buffers.get_mut(&dst).and_then(|b| {
                    let start = usize::try_from(dst_offset).ok()?;
                    let target = b.data.get_mut(start..start + bytes.len())?;
                    target.copy_from_slice(&bytes);
                    Some(())
                });
                if written.is_none() {
                    self.violation(format!("copy writes outside buffer #{dst}"));
                }
            }
            Recorded::CopyBufferToImage {
                src,
                dst,
                width,
                height,
                row_length,
            } => self.copy_to_image(src, dst, width, height, row_length),
            Recorded::ImageBarrier {
                image,
                old_layout,
                new_layout,
            } => {
                if let Some(state) = self.images.get_mut(&image) {
                    let current = state.layout;
                    state.layout = new_layout;
                    if old_layout != vk::ImageLayout::UNDEFINED && current != old_layout {
                        self.violation(format!(
                            "barrier on image #{image} expects {old_layout:?} but image is in {current:?}"
                        ));
                    }
                }
            }
            Recorded::BindDescriptorSet { set, .. } => self.check_set_targets(set, "execute"),
            _ => {}
        }
    }

    fn copy_to_image(&mut self, src: u64, dst: u64, width: u32, height: u32, row_length: u32) {
        let Some(source) = self.buffers.get(&src).map(|b| b.data.clone()) else {
            self.violation(format!("image copy from unknown buffer #{src}"));
            return;
        };
        let Some(image) = self.images.get_mut(&dst) else {
            self.violation(format!("image copy into unknown image #{dst}"));
            return;
        };
        let (Some(texel), true) = (image.texel, image.layout == vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        else {
            let layout = image.layout;
            self.violation(format!(
                "image copy into #{dst} in layout {layout:?} or without a known texel size"
            ));
            return;
        };
        if width > image.width || height > image.height || row_length < width {
            self.violation(format!("image copy region exceeds image #{dst}"));
            return;
        }

        let texel = texel as usize;
        let row_bytes = width as usize * texel;
        let src_pitch = row_length as usize * texel;
        let dst_pitch = image.width as usize * texel;
        for row in 0..height as usize {
            let from = row * src_pitch;
            let Some(bytes) = source.get(from..from + row_bytes) else {
                self.violation(format!("image copy reads outside buffer #{src}"));
                return;
            };
            let to = row * dst_pitch;
            image.data[to..to + row_bytes].copy_from_slice(bytes);
        }
    }

    fn drain(&mut self) {
        while !self.pending.is_empty() {
            self.execute_front();
        }
    }
}

/// Device double with handle-count bookkeeping.
///
/// Clones share state, so a test can keep a probe while the code under
/// test owns the device.
#[derive(Debug, Clone)]
pub struct MockDevice {
    state: Arc<Mutex<State>>,
}

impl MockDevice {
    /// A device presenting to a `width` x `height` window.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new(width, height))),
        }
    }

    /// Override the optional features the device reports.
    #[must_use]
    pub fn with_features(self, features: DeviceFeatures) -> Self {
        self.state.lock().features = features;
        self
    }

    /// Override the surface's image count limits (0 max = unbounded).
    #[must_use]
    pub fn with_image_counts(self, min: u32, max: u32) -> Self {
        {
            let mut state = self.state.lock();
            state.min_image_count = min;
            state.max_image_count = max;
        }
        self
    }

    /// Resize the window. Existing swapchains become out of date.
    pub fn set_extent(&self, width: u32, height: u32) {
        let mut state = self.state.lock();
        state.extent = vk::Extent2D { width, height };
        for swapchain in state.swapchains.values_mut() {
            swapchain.stale = true;
        }
    }

    /// Force the result of the `call`-th acquire (1-based).
    pub fn script_acquire(&self, call: usize, result: AcquireScript) {
        self.state.lock().acquire_script.insert(call, result);
    }

    /// Force the result of the `call`-th present (1-based).
    pub fn script_present(&self, call: usize, status: PresentStatus) {
        self.state.lock().present_script.insert(call, status);
    }

    /// Let `after` more calls at `point` succeed, then fail the next one.
    pub fn inject_fault(&self, point: FaultPoint, after: u32) {
        self.state.lock().faults.insert(point, after);
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().ledger.live_count()
    }

    pub fn live_by_kind(&self) -> BTreeMap<HandleKind, usize> {
        self.state.lock().ledger.live_by_kind()
    }

    pub fn live_of(&self, kind: HandleKind) -> usize {
        self.state.lock().ledger.live_of(kind)
    }

    pub fn created(&self, kind: HandleKind) -> usize {
        self.state.lock().ledger.created(kind)
    }

    pub fn destroyed(&self, kind: HandleKind) -> usize {
        self.state.lock().ledger.destroyed(kind)
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    /// Panic with every recorded violation, if any.
    pub fn assert_clean(&self) {
        let violations = self.violations();
        assert!(
            violations.is_empty(),
            "device misuse:\n  {}",
            violations.join("\n  ")
        );
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    pub fn pending_submissions(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Current contents of a buffer, whatever its memory location.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state
            .lock()
            .buffers
            .get(&buffer.as_raw())
            .map(|b| b.data.clone())
    }

    /// Tightly packed texel contents of a color image.
    pub fn image_contents(&self, image: vk::Image) -> Option<Vec<u8>> {
        self.state
            .lock()
            .images
            .get(&image.as_raw())
            .map(|i| i.data.clone())
    }

    pub fn image_layout(&self, image: vk::Image) -> Option<vk::ImageLayout> {
        self.state
            .lock()
            .images
            .get(&image.as_raw())
            .map(|i| i.layout)
    }

    /// Raw handle currently written at `binding` of `set`.
    pub fn descriptor_target(&self, set: vk::DescriptorSet, binding: u32) -> Option<u64> {
        self.state
            .lock()
            .set_bindings
            .get(&set.as_raw())
            .and_then(|b| b.get(&binding).copied())
    }

    /// Commands last recorded into a command buffer.
    pub fn recorded(&self, command_buffer: vk::CommandBuffer) -> Vec<Recorded> {
        self.state
            .lock()
            .command_buffers
            .get(&command_buffer.as_raw())
            .map(|cb| cb.commands.clone())
            .unwrap_or_default()
    }

    /// Draw commands recorded so far.
    pub fn draw_calls(&self) -> usize {
        self.state.lock().draw_calls
    }

    pub fn acquire_calls(&self) -> usize {
        self.state.lock().acquire_calls
    }

    /// Swapchain extent of every successful present, in order.
    pub fn presented_extents(&self) -> Vec<vk::Extent2D> {
        self.state.lock().presented.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }
}

impl RenderDevice for MockDevice {
    type Buffer = MockBuffer;
    type Image = MockImage;

    fn backend(&self) -> BackendKind {
        BackendKind::Vulkan
    }

    fn drawable_extent(&self) -> vk::Extent2D {
        self.state.lock().extent
    }

    fn features(&self) -> DeviceFeatures {
        self.state.lock().features
    }

    fn surface_capabilities(&self) -> Result<SurfaceCapabilities> {
        let state = self.state.lock();
        Ok(SurfaceCapabilities {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: state.min_image_count,
                max_image_count: state.max_image_count,
                current_extent: state.extent,
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 16384,
                    height: 16384,
                },
                max_image_array_layers: 1,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            },
            formats: state.formats.clone(),
            present_modes: state.present_modes.clone(),
        })
    }

    fn depth_format(&self) -> Result<vk::Format> {
        Ok(vk::Format::D32_SFLOAT)
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<(vk::SwapchainKHR, Vec<vk::Image>)> {
        let mut state = self.state.lock();
        state.fault(FaultPoint::CreateSwapchain)?;
        if desc.extent.width == 0 || desc.extent.height == 0 {
            state.violation(format!("zero-sized swapchain {:?}", desc.extent));
            return Err(GpuError::SwapchainCreation("zero extent".into()));
        }
        let raw = state.create(HandleKind::Swapchain);
        let images: Vec<u64> = (0..desc.image_count)
            .map(|_| state.ledger.reserve())
            .collect();
        for &image in &images {
            state.swapchain_images.insert(image, raw);
        }
        state.ops.push(Op::CreateSwapchain {
            extent: desc.extent,
            images: desc.image_count,
        });
        state.swapchains.insert(
            raw,
            SwapchainState {
                images: images.clone(),
                extent: desc.extent,
                next: 0,
                acquired: HashSet::new(),
                stale: false,
            },
        );
        Ok((
            vk::SwapchainKHR::from_raw(raw),
            images.into_iter().map(vk::Image::from_raw).collect(),
        ))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        let raw = swapchain.as_raw();
        if let Some(removed) = state.swapchains.remove(&raw) {
            let images: HashSet<u64> = removed.images.iter().copied().collect();
            let orphaned = state.views.values().filter(|i| images.contains(*i)).count();
            if orphaned > 0 {
                state.violation(format!(
                    "swapchain #{raw} destroyed with {orphaned} image views still alive"
                ));
            }
            for image in removed.images {
                state.swapchain_images.remove(&image);
            }
        }
        state.release(raw, HandleKind::Swapchain);
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<AcquireStatus> {
        let mut state = self.state.lock();
        state.acquire_calls += 1;
        let call = state.acquire_calls;
        let script = state.acquire_script.remove(&call);
        let raw = swapchain.as_raw();

        let stale = state.swapchains.get(&raw).is_some_and(|s| s.stale);
        if script == Some(AcquireScript::DeviceLost) {
            return Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
        }
        if script == Some(AcquireScript::OutOfDate) || stale {
            state.ops.push(Op::Acquire(AcquireStatus::OutOfDate));
            return Ok(AcquireStatus::OutOfDate);
        }

        let sem = signal.as_raw();
        match state.semaphores.get(&sem).copied() {
            Some(false) => {}
            Some(true) => state.violation(format!("acquire signals semaphore #{sem} twice")),
            None => state.violation(format!("acquire signals unknown semaphore #{sem}")),
        }

        let Some(chain) = state.swapchains.get_mut(&raw) else {
            state.violation(format!("acquire from unknown swapchain #{raw}"));
            return Err(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR));
        };
        let count = chain.images.len() as u32;
        let Some(index) = (0..count)
            .map(|i| (chain.next + i) % count)
            .find(|i| !chain.acquired.contains(i))
        else {
            state.violation("every swapchain image is already acquired".to_string());
            return Err(GpuError::Vulkan(vk::Result::TIMEOUT));
        };
        chain.acquired.insert(index);
        chain.next = (index + 1) % count;

        state.semaphores.insert(sem, true);
        let status = AcquireStatus::Acquired {
            image_index: index,
            suboptimal: script == Some(AcquireScript::Suboptimal),
        };
        state.ops.push(Op::Acquire(status));
        Ok(status)
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentStatus> {
        let mut state = self.state.lock();
        state.present_calls += 1;
        let call = state.present_calls;
        let raw = swapchain.as_raw();

        let sem = wait.as_raw();
        if state.semaphores.get(&sem) == Some(&true) {
            state.semaphores.insert(sem, false);
        } else {
            state.violation(format!("present waits on unsignaled semaphore #{sem}"));
        }

        let Some(chain) = state.swapchains.get_mut(&raw) else {
            state.violation(format!("present to unknown swapchain #{raw}"));
            return Err(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR));
        };
        let was_acquired = chain.acquired.remove(&image_index);
        let stale = chain.stale;
        let extent = chain.extent;
        if !was_acquired {
            state.violation(format!("present of image {image_index} that was not acquired"));
        }

        let status = state
            .present_script
            .remove(&call)
            .unwrap_or(if stale {
                PresentStatus::OutOfDate
            } else {
                PresentStatus::Optimal
            });
        if status != PresentStatus::OutOfDate {
            state.presented.push(extent);
        }
        state.ops.push(Op::Present {
            image_index,
            status,
        });
        Ok(status)
    }

    fn create_buffer(
        &self,
        size: u64,
        _usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<MockBuffer> {
        let mut state = self.state.lock();
        state.fault(FaultPoint::CreateBuffer)?;
        if size == 0 {
            state.violation(format!("zero-sized buffer '{name}'"));
            return Err(GpuError::AllocationFailed(format!("{name}: zero size")));
        }
        let len = usize::try_from(size)
            .map_err(|_| GpuError::AllocationFailed(format!("{name}: too large")))?;
        let raw = state.create(HandleKind::Buffer);
        state.buffers.insert(
            raw,
            BufferState {
                data: vec![0; len],
                host_visible: location != MemoryLocation::GpuOnly,
            },
        );
        Ok(MockBuffer {
            handle: vk::Buffer::from_raw(raw),
            size,
        })
    }

    fn destroy_buffer(&self, buffer: MockBuffer) {
        let mut state = self.state.lock();
        let raw = buffer.handle.as_raw();
        state.buffers.remove(&raw);
        state.release(raw, HandleKind::Buffer);
    }

    fn write_buffer(&self, buffer: &MockBuffer, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let raw = buffer.handle.as_raw();
        state.ops.push(Op::WriteBuffer {
            buffer: raw,
            len: data.len(),
        });
        if state.pending_references().contains(&raw) {
            state.violation(format!(
                "host write to buffer #{raw} while pending GPU work uses it"
            ));
        }
        let Some(target) = state.buffers.get_mut(&raw) else {
            return Err(GpuError::InvalidState(format!("unknown buffer #{raw}")));
        };
        if !target.host_visible {
            return Err(GpuError::InvalidState("Buffer not mapped".into()));
        }
        let start = usize::try_from(offset).map_err(|_| GpuError::InvalidState("offset".into()))?;
        let slot = target
            .data
            .get_mut(start..start + data.len())
            .ok_or_else(|| GpuError::InvalidState(format!("write exceeds buffer #{raw}")))?;
        slot.copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: &MockBuffer, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let raw = buffer.handle.as_raw();
        state.ops.push(Op::ReadBuffer { buffer: raw, len });
        if state.pending_references().contains(&raw) {
            state.violation(format!(
                "host read of buffer #{raw} while pending GPU work uses it"
            ));
        }
        let source = state
            .buffers
            .get(&raw)
            .ok_or_else(|| GpuError::InvalidState(format!("unknown buffer #{raw}")))?;
        if !source.host_visible {
            return Err(GpuError::InvalidState("Buffer not mapped".into()));
        }
        let start = usize::try_from(offset).map_err(|_| GpuError::InvalidState("offset".into()))?;
        source
            .data
            .get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| GpuError::InvalidState(format!("read exceeds buffer #{raw}")))
    }

    fn create_image(&self, desc: &ImageDesc, name: &str) -> Result<MockImage> {
        let mut state = self.state.lock();
        state.fault(FaultPoint::CreateImage)?;
        let vk::Extent2D { width, height } = desc.extent;
        if width == 0 || height == 0 {
            state.violation(format!("zero-sized image '{name}'"));
            return Err(GpuError::AllocationFailed(format!("{name}: zero extent")));
        }
        let texel = texel_size(desc.format);
        let len = texel.map_or(0, |t| width as usize * height as usize * t as usize);
        let raw = state.create(HandleKind::Image);
        state.images.insert(
            raw,
            ImageState {
                width,
                height,
                texel,
                data: vec![0; len],
                layout: vk::ImageLayout::UNDEFINED,
            },
        );
        Ok(MockImage {
            handle: vk::Image::from_raw(raw),
            format: desc.format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
        })
    }

    fn destroy_image(&self, image: MockImage) {
        let mut state = self.state.lock();
        let raw = image.handle.as_raw();
        let views = state.views.values().filter(|i| **i == raw).count();
        if views > 0 {
            state.violation(format!("image #{raw} destroyed before its {views} views"));
        }
        state.images.remove(&raw);
        state.release(raw, HandleKind::Image);
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        let mut state = self.state.lock();
        state.fault(FaultPoint::CreateImageView)?;
        let image = image.as_raw();
        if !state.ledger.is_live(image, HandleKind::Image)
            && !state.swapchain_images.contains_key(&image)
        {
            state.violation(format!("view of dead image #{image}"));
            return Err(GpuError::InvalidState(format!("dead image #{image}")));
        }
        let raw = state.create(HandleKind::ImageView);
        state.views.insert(raw, image);
        Ok(vk::ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state.lock();
        let raw = view.as_raw();
        state.views.remove(&raw);
        state.release(raw, HandleKind::ImageView);
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<vk::Sampler> {
        let mut state = self.state.lock();
        if desc.anisotropy.is_some() && state.features.max_anisotropy.is_none() {
            state.violation("anisotropic sampler without the feature".to_string());
        }
        Ok(vk::Sampler::from_raw(state.create(HandleKind::Sampler)))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state
            .lock()
            .release(sampler.as_raw(), HandleKind::Sampler);
    }

    fn create_render_pass(
        &self,
        _color_format: vk::Format,
        _depth_format: vk::Format,
    ) -> Result<vk::RenderPass> {
        let mut state = self.state.lock();
        Ok(vk::RenderPass::from_raw(state.create(HandleKind::RenderPass)))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state
            .lock()
            .release(render_pass.as_raw(), HandleKind::RenderPass);
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        let mut state = self.state.lock();
        let render_pass = render_pass.as_raw();
        if !state.ledger.is_live(render_pass, HandleKind::RenderPass) {
            state.violation(format!("framebuffer for dead render pass #{render_pass}"));
        }
        for view in attachments {
            if !state.views.contains_key(&view.as_raw()) {
                state.violation(format!("framebuffer attaches dead view #{}", view.as_raw()));
            }
        }
        let raw = state.create(HandleKind::Framebuffer);
        state.framebuffers.insert(
            raw,
            FramebufferState {
                render_pass,
                extent,
            },
        );
        Ok(vk::Framebuffer::from_raw(raw))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut state = self.state.lock();
        let raw = framebuffer.as_raw();
        state.framebuffers.remove(&raw);
        state.release(raw, HandleKind::Framebuffer);
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> Result<vk::DescriptorSetLayout> {
        let mut state = self.state.lock();
        let mut seen = HashSet::new();
        for binding in bindings {
            if !seen.insert(binding.binding) {
                state.violation(format!("duplicate descriptor binding {}", binding.binding));
            }
        }
        Ok(vk::DescriptorSetLayout::from_raw(
            state.create(HandleKind::DescriptorSetLayout),
        ))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state
            .lock()
            .release(layout.as_raw(), HandleKind::DescriptorSetLayout);
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        _push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<vk::PipelineLayout> {
        let mut state = self.state.lock();
        for layout in set_layouts {
            if !state
                .ledger
                .is_live(layout.as_raw(), HandleKind::DescriptorSetLayout)
            {
                state.violation(format!("pipeline layout uses dead set layout #{}", layout.as_raw()));
            }
        }
        Ok(vk::PipelineLayout::from_raw(
            state.create(HandleKind::PipelineLayout),
        ))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state
            .lock()
            .release(layout.as_raw(), HandleKind::PipelineLayout);
    }

    fn create_graphics_pipeline(
        &self,
        config: &GraphicsPipelineConfig,
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
    ) -> Result<vk::Pipeline> {
        let mut state = self.state.lock();
        state.fault(FaultPoint::CreatePipeline)?;
        if config.vertex_shader.is_empty() || config.fragment_shader.is_empty() {
            return Err(GpuError::ShaderCompilation("empty SPIR-V".into()));
        }
        if !state.ledger.is_live(layout.as_raw(), HandleKind::PipelineLayout)
            || !state.ledger.is_live(render_pass.as_raw(), HandleKind::RenderPass)
        {
            state.violation("pipeline built against a dead layout or render pass".to_string());
        }
        if config.polygon_mode != vk::PolygonMode::FILL && !state.features.wireframe {
            state.violation("non-solid polygon mode without the feature".to_string());
        }
        let raw = state.create(HandleKind::Pipeline);
        state.pipelines.insert(raw, render_pass.as_raw());
        Ok(vk::Pipeline::from_raw(raw))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        let mut state = self.state.lock();
        let raw = pipeline.as_raw();
        state.pipelines.remove(&raw);
        state.release(raw, HandleKind::Pipeline);
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool> {
        let mut state = self.state.lock();
        let raw = state.create(HandleKind::DescriptorPool);
        state.descriptor_pools.insert(raw, (max_sets, Vec::new()));
        Ok(vk::DescriptorPool::from_raw(raw))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state.lock();
        let raw = pool.as_raw();
        if let Some((_, sets)) = state.descriptor_pools.remove(&raw) {
            for set in sets {
                state.set_bindings.remove(&set);
                state.release(set, HandleKind::DescriptorSet);
            }
        }
        state.release(raw, HandleKind::DescriptorPool);
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let mut state = self.state.lock();
        state.fault(FaultPoint::AllocateDescriptorSets)?;
        let pool = pool.as_raw();
        let Some((max_sets, allocated)) = state.descriptor_pools.get(&pool) else {
            state.violation(format!("allocation from dead descriptor pool #{pool}"));
            return Err(GpuError::InvalidState(format!("dead pool #{pool}")));
        };
        if allocated.len() + layouts.len() > *max_sets as usize {
            return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        let sets: Vec<u64> = layouts
            .iter()
            .map(|_| state.create(HandleKind::DescriptorSet))
            .collect();
        for &set in &sets {
            state.set_bindings.insert(set, BTreeMap::new());
        }
        if let Some((_, allocated)) = state.descriptor_pools.get_mut(&pool) {
            allocated.extend(&sets);
        }
        Ok(sets.into_iter().map(vk::DescriptorSet::from_raw).collect())
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        let mut state = self.state.lock();
        let set = set.as_raw();
        if !state.ledger.is_live(set, HandleKind::DescriptorSet) {
            state.violation(format!("update of dead descriptor set #{set}"));
            return;
        }
        if state.pending_references().contains(&set) {
            state.violation(format!(
                "descriptor set #{set} updated while pending GPU work uses it"
            ));
        }
        let bound_in: Vec<u64> = state
            .command_buffers
            .iter()
            .filter(|(_, cb)| {
                cb.recording
                    && cb.commands.iter().any(|command| {
                        matches!(command, Recorded::BindDescriptorSet { set: bound, .. } if *bound == set)
                    })
            })
            .map(|(raw, _)| *raw)
            .collect();
        for cb in bound_in {
            state.violation(format!(
                "descriptor set #{set} updated while bound in recording command buffer #{cb}"
            ));
        }
        for write in writes {
            let (binding, target, live) = match *write {
                DescriptorWrite::UniformBuffer { binding, buffer, .. } => {
                    let raw = buffer.as_raw();
                    (binding, raw, state.ledger.is_live(raw, HandleKind::Buffer))
                }
                DescriptorWrite::CombinedImageSampler {
                    binding,
                    view,
                    sampler,
                } => {
                    let raw = view.as_raw();
                    let live = state.ledger.is_live(raw, HandleKind::ImageView)
                        && state.ledger.is_live(sampler.as_raw(), HandleKind::Sampler);
                    (binding, raw, live)
                }
            };
            if !live {
                state.violation(format!(
                    "descriptor set #{set} binding {binding} written with dead #{target}"
                ));
            }
            state.ops.push(Op::UpdateDescriptor {
                set,
                binding,
                target,
            });
            if let Some(bindings) = state.set_bindings.get_mut(&set) {
                bindings.insert(binding, target);
            }
        }
    }

    fn create_command_pool(&self, _transient: bool) -> Result<vk::CommandPool> {
        let mut state = self.state.lock();
        let raw = state.create(HandleKind::CommandPool);
        state.command_pools.insert(raw, Vec::new());
        Ok(vk::CommandPool::from_raw(raw))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        let raw = pool.as_raw();
        if let Some(buffers) = state.command_pools.remove(&raw) {
            for cb in buffers {
                // Freed implicitly with the pool; the release check still
                // flags buffers that are in flight.
                state.release(cb, HandleKind::CommandBuffer);
                state.command_buffers.remove(&cb);
            }
        }
        state.release(raw, HandleKind::CommandPool);
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        let pool = pool.as_raw();
        if !state.command_pools.contains_key(&pool) {
            state.violation(format!("allocation from dead command pool #{pool}"));
            return Err(GpuError::InvalidState(format!("dead pool #{pool}")));
        }
        let buffers: Vec<u64> = (0..count)
            .map(|_| state.create(HandleKind::CommandBuffer))
            .collect();
        for &cb in &buffers {
            state.command_buffers.insert(
                cb,
                CommandBufferState {
                    pool,
                    ..Default::default()
                },
            );
        }
        if let Some(owned) = state.command_pools.get_mut(&pool) {
            owned.extend(&buffers);
        }
        Ok(buffers.into_iter().map(vk::CommandBuffer::from_raw).collect())
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, command_buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.lock();
        let pool = pool.as_raw();
        for cb in command_buffers {
            let raw = cb.as_raw();
            if state.command_buffers.get(&raw).map(|c| c.pool) != Some(pool) {
                state.violation(format!("command buffer #{raw} freed to the wrong pool"));
            }
            state.release(raw, HandleKind::CommandBuffer);
            state.command_buffers.remove(&raw);
            if let Some(owned) = state.command_pools.get_mut(&pool) {
                owned.retain(|c| *c != raw);
            }
        }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        let raw = command_buffer.as_raw();
        state.ops.push(Op::ResetCommandBuffer(raw));
        if state.is_pending(raw) {
            state.violation(format!("command buffer #{raw} reset while in flight"));
        }
        let cb = state
            .command_buffers
            .get_mut(&raw)
            .ok_or_else(|| GpuError::InvalidState(format!("unknown command buffer #{raw}")))?;
        cb.commands.clear();
        cb.recording = false;
        cb.render_pass = None;
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, _one_time: bool) -> Result<()> {
        let mut state = self.state.lock();
        let raw = command_buffer.as_raw();
        state.ops.push(Op::BeginCommandBuffer(raw));
        if state.is_pending(raw) {
            state.violation(format!("command buffer #{raw} re-recorded while in flight"));
        }
        let cb = state
            .command_buffers
            .get_mut(&raw)
            .ok_or_else(|| GpuError::InvalidState(format!("unknown command buffer #{raw}")))?;
        cb.commands.clear();
        cb.recording = true;
        cb.render_pass = None;
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        let raw = command_buffer.as_raw();
        let Some(cb) = state.command_buffers.get_mut(&raw) else {
            return Err(GpuError::InvalidState(format!("unknown command buffer #{raw}")));
        };
        let was_recording = std::mem::replace(&mut cb.recording, false);
        let open_pass = cb.render_pass.is_some();
        if !was_recording {
            state.violation(format!("end of command buffer #{raw} that is not recording"));
        }
        if open_pass {
            state.violation(format!("command buffer #{raw} ended inside a render pass"));
        }
        Ok(())
    }

    fn record(&self, command_buffer: vk::CommandBuffer, command: Command<'_>) {
        let mut state = self.state.lock();
        let raw = command_buffer.as_raw();
        let recorded = Recorded::from_command(command);

        for handle in recorded.references() {
            if !state.resolves(handle) {
                state.violation(format!("command {recorded:?} references dead #{handle}"));
            }
        }

        match recorded {
            Recorded::BeginRenderPass {
                render_pass,
                framebuffer,
                extent,
            } => {
                let incompatible = state
                    .framebuffers
                    .get(&framebuffer)
                    .is_some_and(|fb| fb.render_pass != render_pass || fb.extent != extent);
                if incompatible {
                    state.violation(format!(
                        "render pass #{render_pass} begun on incompatible framebuffer #{framebuffer}"
                    ));
                }
            }
            Recorded::BindPipeline(pipeline) => {
                let built_for = state.pipelines.get(&pipeline).copied();
                let active = state
                    .command_buffers
                    .get(&raw)
                    .and_then(|cb| cb.render_pass);
                if built_for.is_none() || built_for != active {
                    state.violation(format!(
                        "pipeline #{pipeline} bound outside the render pass it was built for"
                    ));
                }
            }
            Recorded::Draw { .. } => state.draw_calls += 1,
            _ => {}
        }

        let Some(cb) = state.command_buffers.get_mut(&raw) else {
            state.violation(format!("record into unknown command buffer #{raw}"));
            return;
        };
        if !cb.recording {
            state.violation(format!("record into command buffer #{raw} that is not recording"));
            return;
        }
        match recorded {
            Recorded::BeginRenderPass { render_pass, .. } => cb.render_pass = Some(render_pass),
            Recorded::EndRenderPass => cb.render_pass = None,
            _ => {}
        }
        cb.commands.push(recorded);
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let mut state = self.state.lock();
        let raw = state.create(HandleKind::Semaphore);
        state.semaphores.insert(raw, false);
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        let raw = semaphore.as_raw();
        state.semaphores.remove(&raw);
        state.release(raw, HandleKind::Semaphore);
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut state = self.state.lock();
        let raw = state.create(HandleKind::Fence);
        state.fences.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        let raw = fence.as_raw();
        if state.pending.iter().any(|p| p.fence == Some(raw)) {
            state.violation(format!("fence #{raw} destroyed while a submission will signal it"));
        }
        state.fences.remove(&raw);
        state.release(raw, HandleKind::Fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut state = self.state.lock();
        let raw = fence.as_raw();
        state.ops.push(Op::WaitFence(raw));
        if !state.fences.contains_key(&raw) {
            state.violation(format!("wait on unknown fence #{raw}"));
            return Err(GpuError::InvalidState(format!("unknown fence #{raw}")));
        }
        while state.fences.get(&raw) == Some(&false)
            && state.pending.iter().any(|p| p.fence == Some(raw))
        {
            state.execute_front();
        }
        if state.fences.get(&raw) == Some(&true) {
            Ok(())
        } else {
            state.violation(format!("wait on fence #{raw} that nothing will signal"));
            Err(GpuError::InvalidState(format!("deadlock on fence #{raw}")))
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut state = self.state.lock();
        let raw = fence.as_raw();
        state.ops.push(Op::ResetFence(raw));
        if state.pending.iter().any(|p| p.fence == Some(raw)) {
            state.violation(format!("fence #{raw} reset while its submission is pending"));
        }
        match state.fences.get_mut(&raw) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(GpuError::InvalidState(format!("unknown fence #{raw}"))),
        }
    }

    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        self.state
            .lock()
            .fences
            .get(&fence.as_raw())
            .copied()
            .ok_or_else(|| GpuError::InvalidState(format!("unknown fence #{}", fence.as_raw())))
    }

    fn submit(&self, submission: &Submission) -> Result<()> {
        let mut state = self.state.lock();
        state.fault(FaultPoint::Submit)?;
        let cb = submission.command_buffer.as_raw();
        let fence = submission.fence.map(|f| f.as_raw());
        state.ops.push(Op::Submit {
            command_buffer: cb,
            fence,
        });

        match state.command_buffers.get(&cb).map(|c| c.recording) {
            None => {
                state.violation(format!("submit of unknown command buffer #{cb}"));
                return Err(GpuError::InvalidState(format!("unknown command buffer #{cb}")));
            }
            Some(true) => {
                state.violation(format!("submit of command buffer #{cb} still recording"));
            }
            Some(false) => {}
        }
        if state.is_pending(cb) {
            state.violation(format!("command buffer #{cb} submitted while already in flight"));
        }

        if let Some((semaphore, _)) = submission.wait {
            let sem = semaphore.as_raw();
            if state.semaphores.get(&sem) == Some(&true) {
                state.semaphores.insert(sem, false);
            } else {
                state.violation(format!("submit waits on unsignaled semaphore #{sem}"));
            }
        }
        if let Some(semaphore) = submission.signal {
            let sem = semaphore.as_raw();
            if state.semaphores.get(&sem) == Some(&true) {
                state.violation(format!("submit signals already signaled semaphore #{sem}"));
            }
            state.semaphores.insert(sem, true);
        }
        if let Some(fence) = fence {
            if state.fences.get(&fence) != Some(&false) {
                state.violation(format!("submit with fence #{fence} that is not unsignaled"));
            }
            if state.pending.iter().any(|p| p.fence == Some(fence)) {
                state.violation(format!("fence #{fence} attached to two pending submissions"));
            }
        }

        let sets: Vec<u64> = state
            .command_buffers
            .get(&cb)
            .map(|c| {
                c.commands
                    .iter()
                    .filter_map(|command| match command {
                        Recorded::BindDescriptorSet { set, .. } => Some(*set),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        for set in sets {
            state.check_set_targets(set, "submit");
        }

        state.pending.push_back(Pending {
            command_buffer: cb,
            fence,
        });
        Ok(())
    }

    fn queue_wait_idle(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.ops.push(Op::QueueWaitIdle);
        state.drain();
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.ops.push(Op::WaitIdle);
        state.drain();
        Ok(())
    }

    fn shutdown(&mut self) {
        let mut state = self.state.lock();
        state.ops.push(Op::Shutdown);
        if state.shut_down {
            state.violation("device shut down twice".to_string());
            return;
        }
        state.shut_down = true;
        if !state.pending.is_empty() {
            let pending = state.pending.len();
            state.violation(format!("shutdown with {pending} submissions pending"));
        }
        let leaks = state.ledger.live_by_kind();
        if !leaks.is_empty() {
            state.violation(format!("shutdown with live handles: {leaks:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_shot(device: &MockDevice) -> (vk::CommandPool, vk::CommandBuffer) {
        let pool = device.create_command_pool(true).unwrap();
        let cb = device.allocate_command_buffers(pool, 1).unwrap()[0];
        (pool, cb)
    }

    #[test]
    fn copies_run_only_when_waited_on() {
        let device = MockDevice::new(64, 64);
        let src = device
            .create_buffer(4, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu, "src")
            .unwrap();
        let dst = device
            .create_buffer(4, vk::BufferUsageFlags::TRANSFER_DST, MemoryLocation::GpuOnly, "dst")
            .unwrap();
        device.write_buffer(&src, 0, &[1, 2, 3, 4]).unwrap();

        let (pool, cb) = one_shot(&device);
        let fence = device.create_fence(false).unwrap();
        device.begin_command_buffer(cb, true).unwrap();
        device.record(
            cb,
            Command::CopyBuffer {
                src: src.handle(),
                dst: dst.handle(),
                src_offset: 0,
                dst_offset: 0,
                size: 4,
            },
        );
        device.end_command_buffer(cb).unwrap();
        device
            .submit(&Submission::standalone(cb, Some(fence)))
            .unwrap();

        assert_eq!(device.buffer_contents(dst.handle()).unwrap(), [0, 0, 0, 0]);
        assert!(!device.fence_signaled(fence).unwrap());

        device.wait_for_fence(fence).unwrap();
        assert_eq!(device.buffer_contents(dst.handle()).unwrap(), [1, 2, 3, 4]);

        device.destroy_fence(fence);
        device.destroy_command_pool(pool);
        device.destroy_buffer(src);
        device.destroy_buffer(dst);
        device.assert_clean();
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn overwriting_in_flight_staging_is_flagged() {
        let device = MockDevice::new(64, 64);
        let src = device
            .create_buffer(4, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu, "src")
            .unwrap();
        let dst = device
            .create_buffer(4, vk::BufferUsageFlags::TRANSFER_DST, MemoryLocation::GpuOnly, "dst")
            .unwrap();
        let (_pool, cb) = one_shot(&device);
        device.begin_command_buffer(cb, true).unwrap();
        device.record(
            cb,
            Command::CopyBuffer {
                src: src.handle(),
                dst: dst.handle(),
                src_offset: 0,
                dst_offset: 0,
                size: 4,
            },
        );
        device.end_command_buffer(cb).unwrap();
        device.submit(&Submission::standalone(cb, None)).unwrap();

        device.write_buffer(&src, 0, &[9; 4]).unwrap();
        assert_eq!(device.violations().len(), 1);
    }

    #[test]
    fn updating_a_set_bound_in_a_recording_buffer_is_flagged() {
        let device = MockDevice::new(64, 64);
        let bindings = [DescriptorBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            stages: vk::ShaderStageFlags::VERTEX,
        }];
        let set_layout = device.create_descriptor_set_layout(&bindings).unwrap();
        let layout = device.create_pipeline_layout(&[set_layout], &[]).unwrap();
        let pool = device
            .create_descriptor_pool(
                1,
                &[vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::UNIFORM_BUFFER,
                    descriptor_count: 1,
                }],
            )
            .unwrap();
        let set = device.allocate_descriptor_sets(pool, &[set_layout]).unwrap()[0];

        // Before any bind the update is fine.
        device.update_descriptor_set(set, &[]);
        device.assert_clean();

        let (_pool, cb) = one_shot(&device);
        device.begin_command_buffer(cb, true).unwrap();
        device.record(cb, Command::BindDescriptorSet { layout, set });
        device.update_descriptor_set(set, &[]);
        assert_eq!(device.violations().len(), 1);
        assert!(device.violations()[0].contains("recording command buffer"));
    }

    #[test]
    fn leaks_are_reported_at_shutdown() {
        let mut device = MockDevice::new(64, 64);
        let _fence = device.create_fence(true).unwrap();
        device.shutdown();
        assert!(device.is_shut_down());
        assert!(device.violations()[0].contains("Fence"));
    }

    #[test]
    fn resize_makes_swapchain_out_of_date() {
        let device = MockDevice::new(64, 64);
        let caps = device.surface_capabilities().unwrap();
        let desc = SwapchainDesc::choose(&caps, device.drawable_extent(), true)
            .unwrap()
            .unwrap();
        let (swapchain, images) = device.create_swapchain(&desc).unwrap();
        assert_eq!(images.len(), 3);

        let sem = device.create_semaphore().unwrap();
        device.set_extent(32, 32);
        assert_eq!(
            device.acquire_next_image(swapchain, sem).unwrap(),
            AcquireStatus::OutOfDate
        );

        device.destroy_semaphore(sem);
        device.destroy_swapchain(swapchain);
        device.assert_clean();
    }

    #[test]
    fn faults_fire_after_the_requested_successes() {
        let device = MockDevice::new(64, 64);
        device.inject_fault(FaultPoint::CreateBuffer, 1);
        let first = device.create_buffer(
            16,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            MemoryLocation::GpuOnly,
            "a",
        );
        assert!(first.is_ok());
        assert!(device
            .create_buffer(16, vk::BufferUsageFlags::VERTEX_BUFFER, MemoryLocation::GpuOnly, "b")
            .is_err());
        assert!(device
            .create_buffer(16, vk::BufferUsageFlags::VERTEX_BUFFER, MemoryLocation::GpuOnly, "c")
            .is_ok());
    }
}
