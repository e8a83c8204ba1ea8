//! Plain-data types shared with shaders and the upload path.

use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Vertex record consumed by the standard vertex shader at binding 0.
///
/// Attribute order is position (location 0), texture coordinate
/// (location 1), normal (location 2).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub tex_coord: [f32; 2],
    pub normal: [f32; 3],
}

impl Vertex {
    pub const fn new(position: [f32; 3], tex_coord: [f32; 2], normal: [f32; 3]) -> Self {
        Self {
            position,
            tex_coord,
            normal,
        }
    }
}

/// Reduced vertex record for flat, unlit pipelines (sprites, overlays).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SpriteVertex {
    pub position: [f32; 3],
    pub tex_coord: [f32; 2],
}

/// Per-frame uniform block at descriptor binding 1.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct UniformFrameData {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl UniformFrameData {
    /// Build the block from column-major matrices.
    pub fn from_matrices(model: Mat4, view: Mat4, proj: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
        }
    }

    /// Raw bytes as written into the mapped uniform buffer.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl Default for UniformFrameData {
    fn default() -> Self {
        Self::from_matrices(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

/// Rasterization style of a sibling pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    #[default]
    Fill,
    Wireframe,
}

impl RenderMode {
    /// Every mode, in pipeline creation order.
    pub const ALL: [Self; 2] = [Self::Fill, Self::Wireframe];

    /// The other mode.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Fill => Self::Wireframe,
            Self::Wireframe => Self::Fill,
        }
    }
}

impl std::fmt::Display for RenderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fill => write!(f, "fill"),
            Self::Wireframe => write!(f, "wireframe"),
        }
    }
}

/// Graphics backend selected once at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Vulkan,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vulkan => write!(f, "vulkan"),
        }
    }
}

/// Layout of a CPU pixel buffer handed over by an asset loader.
///
/// `pitch` is the distance in bytes between the starts of two rows and may
/// exceed `width * texel_size` for padded sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRegion {
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub texel_size: u32,
}

impl PixelRegion {
    /// A tightly packed region.
    pub const fn packed(width: u32, height: u32, texel_size: u32) -> Self {
        Self {
            width,
            height,
            pitch: width * texel_size,
            texel_size,
        }
    }

    /// Bytes of one row without padding.
    pub const fn row_bytes(&self) -> u64 {
        self.width as u64 * self.texel_size as u64
    }

    /// Row length in texels, as expected by buffer-to-image copies.
    pub const fn row_length(&self) -> u32 {
        self.pitch / self.texel_size
    }

    /// Minimum number of source bytes covering every row.
    pub const fn required_len(&self) -> u64 {
        if self.height == 0 {
            return 0;
        }
        self.pitch as u64 * (self.height as u64 - 1) + self.row_bytes()
    }

    /// Check the region against a source buffer of `len` bytes.
    pub fn validate(&self, len: usize) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidData(format!(
                "degenerate image {}x{}",
                self.width, self.height
            )));
        }
        if self.texel_size == 0 || self.pitch % self.texel_size != 0 {
            return Err(Error::InvalidData(format!(
                "pitch {} is not a multiple of the texel size {}",
                self.pitch, self.texel_size
            )));
        }
        if u64::from(self.pitch) < self.row_bytes() {
            return Err(Error::InvalidData(format!(
                "pitch {} is shorter than a row of {} bytes",
                self.pitch,
                self.row_bytes()
            )));
        }
        if (len as u64) < self.required_len() {
            return Err(Error::OutOfBounds(format!(
                "{} bytes supplied, {} required",
                len,
                self.required_len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;

    #[test]
    fn vertex_layout_matches_shader_contract() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::offset_of!(Vertex, tex_coord), 12);
        assert_eq!(std::mem::offset_of!(Vertex, normal), 20);
        assert_eq!(std::mem::size_of::<SpriteVertex>(), 20);
    }

    #[test]
    fn uniform_block_is_three_matrices() {
        assert_eq!(std::mem::size_of::<UniformFrameData>(), 192);
        assert_eq!(UniformFrameData::default().as_bytes().len(), 192);
    }

    #[test]
    fn uniform_block_is_column_major() {
        let model = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let data = UniformFrameData::from_matrices(model, Mat4::IDENTITY, Mat4::IDENTITY);
        assert_relative_eq!(data.model[3][0], 1.0);
        assert_relative_eq!(data.model[3][1], 2.0);
        assert_relative_eq!(data.model[3][2], 3.0);
        assert_relative_eq!(data.view[0][0], 1.0);
    }

    #[test]
    fn render_mode_toggles() {
        assert_eq!(RenderMode::Fill.toggled(), RenderMode::Wireframe);
        assert_eq!(RenderMode::Wireframe.toggled(), RenderMode::Fill);
        assert_eq!(RenderMode::default(), RenderMode::Fill);
    }

    #[test]
    fn packed_region_accepts_exact_buffer() {
        let region = PixelRegion::packed(4, 2, 4);
        assert_eq!(region.row_length(), 4);
        assert_eq!(region.required_len(), 32);
        assert!(region.validate(32).is_ok());
        assert!(region.validate(31).is_err());
    }

    #[test]
    fn padded_region_needs_no_trailing_padding() {
        let region = PixelRegion {
            width: 3,
            height: 2,
            pitch: 16,
            texel_size: 4,
        };
        assert_eq!(region.row_length(), 4);
        assert_eq!(region.required_len(), 16 + 12);
        assert!(region.validate(28).is_ok());
    }

    #[test]
    fn region_rejects_bad_pitch() {
        let short = PixelRegion {
            width: 4,
            height: 1,
            pitch: 8,
            texel_size: 4,
        };
        assert!(matches!(short.validate(64), Err(Error::InvalidData(_))));

        let misaligned = PixelRegion {
            width: 1,
            height: 1,
            pitch: 6,
            texel_size: 4,
        };
        assert!(matches!(misaligned.validate(64), Err(Error::InvalidData(_))));
    }

    #[test]
    fn region_rejects_zero_extent() {
        assert!(PixelRegion::packed(0, 4, 4).validate(0).is_err());
        assert!(PixelRegion::packed(4, 0, 4).validate(0).is_err());
    }
}
