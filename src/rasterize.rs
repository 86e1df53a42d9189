//! Conservative rasterization of triangles into a [`Heightfield`].

use glam::Vec3A;

use crate::{
    heightfield::{Heightfield, SpanInsertion, SpanInsertionError},
    math::Aabb3d,
    span::{AreaType, Span, SpanBuilder},
    trimesh::TriMesh,
};

/// A triangle clipped against the four planes of a cell becomes at most a 7-gon.
const MAX_CLIPPED_VERTS: usize = 7;

impl Heightfield {
    /// Rasterizes all triangles of a [`TriMesh`] into the heightfield.
    ///
    /// Triangles that do not overlap the heightfield AABB add no spans.
    /// `flag_merge_threshold` is the maximum ceiling distance at which two
    /// merged spans also merge their area ids; in practice this is the
    /// walkable climb.
    pub fn rasterize_triangles(
        &mut self,
        trimesh: &TriMesh,
        flag_merge_threshold: u16,
    ) -> Result<(), SpanInsertionError> {
        for (i, triangle) in trimesh.indices.iter().enumerate() {
            let triangle = [
                trimesh.vertices[triangle[0] as usize],
                trimesh.vertices[triangle[1] as usize],
                trimesh.vertices[triangle[2] as usize],
            ];
            let area = trimesh.area_types[i];
            self.rasterize_triangle(triangle, area, flag_merge_threshold)?;
        }
        Ok(())
    }

    /// Rasterizes a single triangle given in world units.
    pub fn rasterize_triangle(
        &mut self,
        triangle: [Vec3A; 3],
        area: AreaType,
        flag_merge_threshold: u16,
    ) -> Result<(), SpanInsertionError> {
        let triangle_aabb = Aabb3d::from_verts(&triangle).unwrap_or_default();
        // If the triangle does not touch the bbox of the heightfield, skip it.
        if !self.aabb.intersects(&triangle_aabb) {
            return Ok(());
        }

        let w = self.width as i32;
        let h = self.height as i32;
        let by = self.aabb.max.y - self.aabb.min.y;
        let inverse_cell_size = 1.0 / self.cell_size;
        let inverse_cell_height = 1.0 / self.cell_height;

        // Calculate the footprint of the triangle on the grid's z-axis.
        let z0 = ((triangle_aabb.min.z - self.aabb.min.z) * inverse_cell_size) as i32;
        let z1 = ((triangle_aabb.max.z - self.aabb.min.z) * inverse_cell_size) as i32;
        let z0 = z0.clamp(0, h - 1);
        let z1 = z1.clamp(0, h - 1);

        // Clip the triangle into all grid cells it touches.
        let mut buf = [Vec3A::ZERO; MAX_CLIPPED_VERTS * 3];
        let (cell_buf, rest) = buf.split_at_mut(MAX_CLIPPED_VERTS);
        let (out, row_buf) = rest.split_at_mut(MAX_CLIPPED_VERTS);

        for z in z0..=z1 {
            // Clip polygon to row.
            cell_buf[..3].copy_from_slice(&triangle);
            let mut nvrow = 3;
            let cz = self.aabb.min.z + z as f32 * self.cell_size;
            nvrow = clip_poly(&cell_buf[..nvrow], out, 0.0, 1.0, -cz);
            if nvrow < 3 {
                continue;
            }
            nvrow = clip_poly(&out[..nvrow], row_buf, 0.0, -1.0, cz + self.cell_size);
            if nvrow < 3 {
                continue;
            }

            // Calculate the footprint of the row on the grid's x-axis.
            let mut min_x = row_buf[0].x;
            let mut max_x = row_buf[0].x;
            for vert in &row_buf[1..nvrow] {
                min_x = min_x.min(vert.x);
                max_x = max_x.max(vert.x);
            }
            let x0 = ((min_x - self.aabb.min.x) * inverse_cell_size) as i32;
            let x1 = ((max_x - self.aabb.min.x) * inverse_cell_size) as i32;
            if x1 < 0 || x0 >= w {
                continue;
            }
            let x0 = x0.clamp(0, w - 1);
            let x1 = x1.clamp(0, w - 1);

            for x in x0..=x1 {
                // Clip polygon to column.
                let mut nv = nvrow;
                let cx = self.aabb.min.x + x as f32 * self.cell_size;
                nv = clip_poly(&row_buf[..nv], out, 1.0, 0.0, -cx);
                if nv < 3 {
                    continue;
                }
                nv = clip_poly(&out[..nv], cell_buf, -1.0, 0.0, cx + self.cell_size);
                if nv < 3 {
                    continue;
                }

                // Calculate min and max of the span.
                let mut smin = cell_buf[0].y;
                let mut smax = cell_buf[0].y;
                for vert in &cell_buf[1..nv] {
                    smin = smin.min(vert.y);
                    smax = smax.max(vert.y);
                }
                smin -= self.aabb.min.y;
                smax -= self.aabb.min.y;
                // Skip the span if it is outside the heightfield bbox.
                if smax < 0.0 || smin > by {
                    continue;
                }
                // Clamp the span to the heightfield bbox.
                let smin = smin.max(0.0);
                let smax = smax.min(by);

                // Snap the span to the heightfield height grid.
                let min = ((smin * inverse_cell_height).floor() as i32)
                    .clamp(0, Span::MAX_HEIGHT as i32) as u16;
                let max = ((smax * inverse_cell_height).ceil() as i32)
                    .clamp(min as i32 + 1, Span::MAX_HEIGHT as i32)
                    as u16;

                self.add_span(SpanInsertion {
                    x: x as u16,
                    z: z as u16,
                    flag_merge_threshold,
                    span: SpanBuilder {
                        min,
                        max,
                        area,
                        next: None,
                    }
                    .build(),
                })?;
            }
        }
        Ok(())
    }
}

/// Clips a polygon against the vertical plane with xz-normal
/// `(normal_x, normal_z)` and offset `plane_d`, keeping the side where
/// `normal_x * x + normal_z * z + plane_d >= 0`.
///
/// Writes the surviving vertices into `out` and returns their count, at most
/// `input.len() + 1`.
fn clip_poly(input: &[Vec3A], out: &mut [Vec3A], normal_x: f32, normal_z: f32, plane_d: f32) -> usize {
    let mut distances = [0.0_f32; MAX_CLIPPED_VERTS];
    for (distance, vert) in distances.iter_mut().zip(input) {
        *distance = normal_x * vert.x + normal_z * vert.z + plane_d;
    }

    let mut m = 0;
    let n = input.len();
    let mut j = n - 1;
    for i in 0..n {
        let ina = distances[j] >= 0.0;
        let inb = distances[i] >= 0.0;
        if ina != inb {
            // The edge crosses the plane, emit the intersection.
            let s = distances[j] / (distances[j] - distances[i]);
            out[m] = input[j] + (input[i] - input[j]) * s;
            m += 1;
        }
        if inb {
            out[m] = input[i];
            m += 1;
        }
        j = i;
    }
    m
}
