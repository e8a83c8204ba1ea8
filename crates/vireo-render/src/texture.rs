//! Sampled textures.

use ash::vk;
use vireo_gpu::{DeviceImage, RenderDevice};

/// A device-local image in `SHADER_READ_ONLY_OPTIMAL` with its view.
pub struct Texture<D: RenderDevice> {
    pub(crate) image: D::Image,
    pub(crate) view: vk::ImageView,
}

impl<D: RenderDevice> Texture<D> {
    pub fn image(&self) -> &D::Image {
        &self.image
    }

    pub const fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn width(&self) -> u32 {
        self.image.extent().width
    }

    pub fn height(&self) -> u32 {
        self.image.extent().height
    }

    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    /// Release the view, then the image.
    pub fn destroy(self, device: &D) {
        device.destroy_image_view(self.view);
        device.destroy_image(self.image);
    }
}
