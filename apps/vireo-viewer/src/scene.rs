//! Procedural scene content: the cube mesh and the animated texture.

use glam::Vec3;
use vireo_core::Vertex;

/// Cube faces as (normal, u axis, v axis), with `u x v = normal`.
const FACES: [(Vec3, Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Z, Vec3::Y),
    (Vec3::NEG_X, Vec3::Z, Vec3::Y),
    (Vec3::Y, Vec3::X, Vec3::NEG_Z),
    (Vec3::NEG_Y, Vec3::X, Vec3::Z),
    (Vec3::Z, Vec3::X, Vec3::Y),
    (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
];

/// Unit cube centered on the origin, four vertices per face so every face
/// carries its own normal and full texture coordinates. Faces wind
/// counter-clockwise seen from outside.
pub fn cube() -> (Vec<Vertex>, Vec<u32>) {
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, u, v) in FACES {
        let base = vertices.len() as u32;
        for (s, t) in [(0.0_f32, 0.0_f32), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            let position = normal * 0.5 + u * (s - 0.5) + v * (t - 0.5);
            vertices.push(Vertex::new(
                position.to_array(),
                [s, 1.0 - t],
                normal.to_array(),
            ));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    (vertices, indices)
}

const LIGHT: [u8; 4] = [235, 235, 220, 255];
const DARK: [u8; 4] = [40, 90, 140, 255];
const BAND: [u8; 4] = [250, 170, 40, 255];

/// Paint an RGBA checkerboard of `cell`-sized squares into `pixels`, with a
/// horizontal band whose row is `phase` (0..1) of the way down.
pub fn paint_checker(pixels: &mut [u8], size: u32, cell: u32, phase: f32) {
    let cell = cell.max(1);
    let band_row = (phase.rem_euclid(1.0) * size as f32) as u32;
    let band_height = cell / 2;

    for (i, texel) in pixels.chunks_exact_mut(4).enumerate() {
        let x = i as u32 % size;
        let y = i as u32 / size;
        let color = if y >= band_row && y < band_row + band_height {
            BAND
        } else if (x / cell + y / cell) % 2 == 0 {
            LIGHT
        } else {
            DARK
        };
        texel.copy_from_slice(&color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cube_has_24_vertices_and_12_triangles() {
        let (vertices, indices) = cube();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn cube_faces_wind_outward() {
        let (vertices, indices) = cube();
        for triangle in indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|k| Vec3::from(vertices[triangle[k] as usize].position));
            let face_normal = (b - a).cross(c - a).normalize();
            let normal = Vec3::from(vertices[triangle[0] as usize].normal);
            assert_relative_eq!(face_normal.dot(normal), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn cube_positions_stay_on_the_unit_cube() {
        let (vertices, _) = cube();
        for vertex in vertices {
            let max = vertex.position.iter().fold(0.0_f32, |m, c| m.max(c.abs()));
            assert_relative_eq!(max, 0.5);
        }
    }

    #[test]
    fn checker_alternates_cells() {
        let size = 8;
        let mut pixels = vec![0; (size * size * 4) as usize];
        // Band parked on the last row.
        paint_checker(&mut pixels, size, 2, 0.999);
        let texel = |x: u32, y: u32| {
            let i = ((y * size + x) * 4) as usize;
            [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
        };
        assert_eq!(texel(0, 0), LIGHT);
        assert_eq!(texel(2, 0), DARK);
        assert_eq!(texel(2, 2), LIGHT);
    }

    #[test]
    fn band_follows_phase() {
        let size = 16;
        let mut pixels = vec![0; (size * size * 4) as usize];
        paint_checker(&mut pixels, size, 4, 0.5);
        let row = |y: u32| &pixels[(y * size * 4) as usize..((y * size + 1) * 4) as usize];
        assert_eq!(row(8), BAND);
        assert_eq!(row(9), BAND);
        assert_ne!(row(10), BAND);
        assert_ne!(row(7), BAND);
    }
}
