//! Viewer application: an orbiting camera around a lit, textured cube whose
//! texture is streamed every frame.

use ash::vk;
use glam::{Mat4, Vec3};
use tracing::info;
use winit::event::ElementState;
use winit::keyboard::{KeyCode, PhysicalKey};

use vireo_app::{AppConfig, AppContext, Camera, FrameContext, GpuContext, RenderApp, WindowEvent};
use vireo_core::PixelRegion;
use vireo_render::{Mesh, PipelineDesc};

use crate::scene;

/// Side of the square streamed texture, in texels.
const TEXTURE_SIZE: u32 = 128;

/// Side of one checker square, in texels.
const CHECKER_CELL: u32 = 16;

/// Camera orbit speed in radians per second.
const ORBIT_SPEED: f32 = 0.5;
const ORBIT_RADIUS: f32 = 3.0;
const ORBIT_HEIGHT: f32 = 1.5;

/// Cube spin in radians per second.
const SPIN_SPEED: f32 = 0.3;

/// Band sweeps per second.
const BAND_SPEED: f32 = 0.25;

/// Viewer application state.
pub struct Viewer {
    cube: Option<Mesh<GpuContext>>,
    camera: Camera,
    /// Seconds since the first frame.
    time: f32,
    pixels: Vec<u8>,
    region: PixelRegion,
    /// Whether the texture is re-streamed every frame.
    animate_texture: bool,
}

impl Viewer {
    pub fn new() -> Self {
        Self {
            cube: None,
            camera: Camera::new(
                Vec3::new(0.0, ORBIT_HEIGHT, ORBIT_RADIUS),
                Vec3::ZERO,
                Vec3::Y,
                60.0_f32.to_radians(),
                16.0 / 9.0,
            ),
            time: 0.0,
            pixels: vec![0; (TEXTURE_SIZE * TEXTURE_SIZE * 4) as usize],
            region: PixelRegion::packed(TEXTURE_SIZE, TEXTURE_SIZE, 4),
            animate_texture: true,
        }
    }
}

impl Default for Viewer {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderApp<GpuContext> for Viewer {
    fn pipeline(&self, _config: &AppConfig) -> PipelineDesc {
        PipelineDesc::new(
            vireo_shaders::mesh_vertex_shader().to_vec(),
            vireo_shaders::mesh_fragment_shader().to_vec(),
        )
    }

    fn load(&mut self, ctx: &mut AppContext<GpuContext>) -> anyhow::Result<()> {
        let (vertices, indices) = scene::cube();
        self.cube = Some(ctx.upload_mesh(&vertices, &indices, "cube")?);

        scene::paint_checker(&mut self.pixels, TEXTURE_SIZE, CHECKER_CELL, 0.0);
        let texture = ctx.upload_texture(
            &self.pixels,
            self.region,
            vk::Format::R8G8B8A8_SRGB,
            "checker",
        )?;
        ctx.bind_texture(texture)?;

        if let Some(extent) = ctx.extent() {
            self.camera.set_viewport(extent.width, extent.height);
        }
        info!("Scene loaded: W toggles wireframe, Space pauses the texture, Escape quits");
        Ok(())
    }

    fn draw(&mut self, ctx: &mut AppContext<GpuContext>, frame: &FrameContext) -> anyhow::Result<()> {
        self.time += frame.dt;

        self.camera
            .orbit(Vec3::ZERO, ORBIT_RADIUS, ORBIT_HEIGHT, self.time * ORBIT_SPEED);
        let model = Mat4::from_rotation_y(self.time * SPIN_SPEED);
        ctx.write_uniforms(frame, &self.camera.uniforms(model))?;

        if self.animate_texture {
            scene::paint_checker(
                &mut self.pixels,
                TEXTURE_SIZE,
                CHECKER_CELL,
                self.time * BAND_SPEED,
            );
            ctx.stream_bound_texture(&self.pixels, self.region)?;
        }

        if let Some(cube) = &self.cube {
            ctx.draw_mesh(frame, cube, 1);
        }
        Ok(())
    }

    fn event(&mut self, ctx: &mut AppContext<GpuContext>, event: &WindowEvent) {
        let WindowEvent::KeyboardInput { event, .. } = event else {
            return;
        };
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        match event.physical_key {
            PhysicalKey::Code(KeyCode::KeyW) => {
                let mode = ctx.toggle_mode();
                info!("Render mode: {mode}");
            }
            PhysicalKey::Code(KeyCode::Space) => {
                self.animate_texture = !self.animate_texture;
                info!(
                    "Texture animation {}",
                    if self.animate_texture { "resumed" } else { "paused" }
                );
            }
            PhysicalKey::Code(KeyCode::Escape) => ctx.request_quit(),
            _ => {}
        }
    }

    fn resize(
        &mut self,
        _ctx: &mut AppContext<GpuContext>,
        width: u32,
        height: u32,
    ) -> anyhow::Result<()> {
        self.camera.set_viewport(width, height);
        Ok(())
    }

    fn cleanup(&mut self, ctx: &mut AppContext<GpuContext>) {
        if let Some(cube) = self.cube.take() {
            cube.destroy(ctx.device());
        }
    }
}
