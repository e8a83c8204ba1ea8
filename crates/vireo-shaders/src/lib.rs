//! Built-in shaders for the Vireo rendering runtime.
//!
//! GLSL sources live in `shaders/` and are compiled to SPIR-V at build time
//! using shaderc. The mesh pair follows the standard binding contract: the
//! `Vertex` record at binding 0, a combined image sampler at descriptor
//! binding 0 and the per-frame uniform block at descriptor binding 1.

use std::sync::OnceLock;

/// Embedded SPIR-V shader bytecode (raw bytes, may not be aligned).
mod spirv_bytes {
    pub static MESH_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh_vert.spv"));
    pub static MESH_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh_frag.spv"));
}

/// Convert a byte slice to SPIR-V words. Trailing bytes that do not form
/// a whole word are dropped; shaderc output is always word-sized.
fn bytes_to_spirv(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

static MESH_VERT_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
static MESH_FRAG_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();

/// Lit, textured mesh vertex shader.
pub fn mesh_vertex_shader() -> &'static [u32] {
    MESH_VERT_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::MESH_VERT))
}

/// Lit, textured mesh fragment shader.
pub fn mesh_fragment_shader() -> &'static [u32] {
    MESH_FRAG_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::MESH_FRAG))
}
