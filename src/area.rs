//! Shaping of the walkable area: erosion by the agent radius, area median
//! filtering, and volume-based area tagging.

use glam::{Vec2, Vec3A};

use crate::{compact_heightfield::CompactHeightfield, math::Aabb3d, span::AreaType};

impl CompactHeightfield {
    /// Erodes the walkable area by the agent radius, in voxels.
    ///
    /// Any span closer than `walkable_radius` cells to an unwalkable span or
    /// to missing geometry becomes unwalkable, so the final mesh keeps the
    /// agent's center away from walls.
    pub fn erode_walkable_area(&mut self, walkable_radius: u16) {
        // Seed: 0 on boundary spans, "far" everywhere else.
        let mut distance_to_boundary = vec![u8::MAX; self.spans.len()];
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    if !self.areas[i].is_walkable() {
                        distance_to_boundary[i] = 0;
                        continue;
                    }
                    // Check that there is a walkable neighbor in all 4 directions.
                    let span = &self.spans[i];
                    let mut neighbor_count = 0;
                    for dir in 0..4 {
                        let Some(con) = span.con(dir) else {
                            break;
                        };
                        let (_, _, neighbor_index) = self.con_indices(x as i32, z as i32, dir, con);
                        if !self.areas[neighbor_index].is_walkable() {
                            break;
                        }
                        neighbor_count += 1;
                    }
                    if neighbor_count != 4 {
                        distance_to_boundary[i] = 0;
                    }
                }
            }
        }

        self.chamfer_distance_u8(&mut distance_to_boundary);

        // Anything closer than twice the radius (distances are doubled) gets
        // eroded away.
        let min_boundary_distance = (walkable_radius * 2).min(u8::MAX as u16) as u8;
        for (area, distance) in self.areas.iter_mut().zip(&distance_to_boundary) {
            if *distance < min_boundary_distance {
                *area = AreaType::NOT_WALKABLE;
            }
        }
    }

    /// Two-pass 3×3 chamfer transform over the connection graph, with
    /// saturating byte distances. Axial steps cost 2, diagonal steps 3.
    fn chamfer_distance_u8(&self, dist: &mut [u8]) {
        // Pass 1: sweep low-to-high, pulling from the (-x), (-x,-z), (-z),
        // and (+x,-z) neighbors.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    let span = self.spans[i].clone();
                    if let Some(con) = span.con(0) {
                        // (-1, 0)
                        let (ax, az, a_i) = self.con_indices(x as i32, z as i32, 0, con);
                        dist[i] = dist[i].min(dist[a_i].saturating_add(2));
                        // (-1, -1)
                        if let Some(con) = self.spans[a_i].con(3) {
                            let (_, _, aa_i) = self.con_indices(ax, az, 3, con);
                            dist[i] = dist[i].min(dist[aa_i].saturating_add(3));
                        }
                    }
                    if let Some(con) = span.con(3) {
                        // (0, -1)
                        let (ax, az, a_i) = self.con_indices(x as i32, z as i32, 3, con);
                        dist[i] = dist[i].min(dist[a_i].saturating_add(2));
                        // (1, -1)
                        if let Some(con) = self.spans[a_i].con(2) {
                            let (_, _, aa_i) = self.con_indices(ax, az, 2, con);
                            dist[i] = dist[i].min(dist[aa_i].saturating_add(3));
                        }
                    }
                }
            }
        }

        // Pass 2: sweep high-to-low, pulling from the (+x), (+x,+z), (+z),
        // and (-x,+z) neighbors.
        for z in (0..self.height).rev() {
            for x in (0..self.width).rev() {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    let span = self.spans[i].clone();
                    if let Some(con) = span.con(2) {
                        // (1, 0)
                        let (ax, az, a_i) = self.con_indices(x as i32, z as i32, 2, con);
                        dist[i] = dist[i].min(dist[a_i].saturating_add(2));
                        // (1, 1)
                        if let Some(con) = self.spans[a_i].con(1) {
                            let (_, _, aa_i) = self.con_indices(ax, az, 1, con);
                            dist[i] = dist[i].min(dist[aa_i].saturating_add(3));
                        }
                    }
                    if let Some(con) = span.con(1) {
                        // (0, 1)
                        let (ax, az, a_i) = self.con_indices(x as i32, z as i32, 1, con);
                        dist[i] = dist[i].min(dist[a_i].saturating_add(2));
                        // (-1, 1)
                        if let Some(con) = self.spans[a_i].con(0) {
                            let (_, _, aa_i) = self.con_indices(ax, az, 0, con);
                            dist[i] = dist[i].min(dist[aa_i].saturating_add(3));
                        }
                    }
                }
            }
        }
    }

    /// Applies a median filter to the walkable areas, removing noise from
    /// externally tagged surfaces.
    ///
    /// For each walkable span the filter gathers the areas of the span and
    /// its eight surrounding neighbors (reached through two hops of
    /// 4-connected links) and keeps the median.
    pub fn median_filter_walkable_area(&mut self) {
        let mut filtered = self.areas.clone();

        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    // Unwalkable spans are left untouched.
                    if !self.areas[i].is_walkable() {
                        continue;
                    }
                    let mut neighborhood = [self.areas[i]; 9];
                    let span = &self.spans[i];
                    for dir in 0..4 {
                        let Some(con) = span.con(dir) else {
                            continue;
                        };
                        let (ax, az, a_i) = self.con_indices(x as i32, z as i32, dir, con);
                        if self.areas[a_i].is_walkable() {
                            neighborhood[dir as usize * 2] = self.areas[a_i];
                        }
                        // The diagonal behind the axial neighbor.
                        let dir_diag = (dir + 1) & 0x3;
                        if let Some(con) = self.spans[a_i].con(dir_diag) {
                            let (_, _, aa_i) = self.con_indices(ax, az, dir_diag, con);
                            if self.areas[aa_i].is_walkable() {
                                neighborhood[dir as usize * 2 + 1] = self.areas[aa_i];
                            }
                        }
                    }
                    neighborhood.sort_unstable();
                    filtered[i] = neighborhood[4];
                }
            }
        }

        self.areas = filtered;
    }

    /// Overwrites the area type of all walkable spans within the given
    /// world-space box.
    pub fn mark_box_area(&mut self, aabb: Aabb3d, area: AreaType) {
        let Some((min, max)) = self.grid_footprint(&aabb) else {
            return;
        };

        for z in min.1..=max.1 {
            for x in min.0..=max.0 {
                let cell = *self.cell_at(x as u16, z as u16);
                for i in cell.index_range() {
                    if !self.areas[i].is_walkable() {
                        continue;
                    }
                    let y = self.spans[i].y as i32;
                    if y >= min.2 && y <= max.2 {
                        self.areas[i] = area;
                    }
                }
            }
        }
    }

    /// Overwrites the area type of all walkable spans within the given
    /// world-space vertical cylinder.
    pub fn mark_cylinder_area(&mut self, position: Vec3A, radius: f32, height: f32, area: AreaType) {
        let aabb = Aabb3d {
            min: position - Vec3A::new(radius, 0.0, radius),
            max: position + Vec3A::new(radius, height, radius),
        };
        let Some((min, max)) = self.grid_footprint(&aabb) else {
            return;
        };
        let radius_squared = radius * radius;

        for z in min.1..=max.1 {
            for x in min.0..=max.0 {
                let cell = *self.cell_at(x as u16, z as u16);
                for i in cell.index_range() {
                    if !self.areas[i].is_walkable() {
                        continue;
                    }
                    let y = self.spans[i].y as i32;
                    if y < min.2 || y > max.2 {
                        continue;
                    }
                    let sample_x = self.aabb.min.x + (x as f32 + 0.5) * self.cell_size;
                    let sample_z = self.aabb.min.z + (z as f32 + 0.5) * self.cell_size;
                    let dx = sample_x - position.x;
                    let dz = sample_z - position.z;
                    if dx * dx + dz * dz < radius_squared {
                        self.areas[i] = area;
                    }
                }
            }
        }
    }

    /// Overwrites the area type of all walkable spans within the given convex
    /// volume.
    pub fn mark_convex_poly_area(&mut self, volume: &ConvexVolume) {
        let Some(outline_aabb) = volume.compute_aabb() else {
            // The volume is empty.
            return;
        };
        let Some((min, max)) = self.grid_footprint(&outline_aabb) else {
            return;
        };

        for z in min.1..=max.1 {
            for x in min.0..=max.0 {
                let cell = *self.cell_at(x as u16, z as u16);
                for i in cell.index_range() {
                    if !self.areas[i].is_walkable() {
                        continue;
                    }
                    let y = self.spans[i].y as i32;
                    if y < min.2 || y > max.2 {
                        continue;
                    }
                    let sample = Vec2::new(
                        self.aabb.min.x + (x as f32 + 0.5) * self.cell_size,
                        self.aabb.min.z + (z as f32 + 0.5) * self.cell_size,
                    );
                    if point_in_poly(sample, &volume.vertices) {
                        self.areas[i] = volume.area;
                    }
                }
            }
        }
    }

    /// Clamps a world-space AABB to this field's grid. Returns the inclusive
    /// `(x, z, y)` cell ranges, or `None` if the box misses the grid entirely.
    fn grid_footprint(&self, aabb: &Aabb3d) -> Option<((i32, i32, i32), (i32, i32, i32))> {
        let min = (aabb.min - self.aabb.min) / Vec3A::new(self.cell_size, self.cell_height, self.cell_size);
        let max = (aabb.max - self.aabb.min) / Vec3A::new(self.cell_size, self.cell_height, self.cell_size);
        let (min_x, max_x) = (min.x as i32, max.x as i32);
        let (min_z, max_z) = (min.z as i32, max.z as i32);

        if max_x < 0 || min_x >= self.width as i32 || max_z < 0 || min_z >= self.height as i32 {
            return None;
        }
        Some((
            (min_x.max(0), min_z.max(0), min.y as i32),
            (
                max_x.min(self.width as i32 - 1),
                max_z.min(self.height as i32 - 1),
                max.y as i32,
            ),
        ))
    }
}

/// A convex polygonal column used to tag areas,
/// e.g. water surfaces or doorways.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvexVolume {
    /// The xz-plane outline of the volume. Must be convex,
    /// in either winding.
    pub vertices: Vec<Vec2>,
    /// The lower y-bound of the volume in world units.
    pub min_y: f32,
    /// The upper y-bound of the volume in world units.
    pub max_y: f32,
    /// The area to tag contained spans with.
    pub area: AreaType,
}

impl ConvexVolume {
    fn compute_aabb(&self) -> Option<Aabb3d> {
        let (first, rest) = self.vertices.split_first()?;
        let mut min = *first;
        let mut max = *first;
        for vert in rest {
            min = min.min(*vert);
            max = max.max(*vert);
        }
        Some(Aabb3d {
            min: Vec3A::new(min.x, self.min_y, min.y),
            max: Vec3A::new(max.x, self.max_y, max.y),
        })
    }
}

/// Standard ray-crossing point-in-polygon test on the xz-plane.
fn point_in_poly(point: Vec2, vertices: &[Vec2]) -> bool {
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let vi = vertices[i];
        let vj = vertices[j];
        if ((vi.y > point.y) != (vj.y > point.y))
            && (point.x < (vj.x - vi.x) * (point.y - vi.y) / (vj.y - vi.y) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        heightfield::{Heightfield, HeightfieldBuilder, SpanInsertion},
        span::SpanBuilder,
    };

    use super::*;

    fn flat_field(size: f32) -> CompactHeightfield {
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::ZERO,
                max: Vec3A::new(size, 10.0, size),
            },
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                insert(&mut heightfield, x, z, AreaType::DEFAULT_WALKABLE);
            }
        }
        heightfield.into_compact(2, 1).unwrap()
    }

    fn insert(heightfield: &mut Heightfield, x: u16, z: u16, area: AreaType) {
        heightfield
            .add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: 0,
                span: SpanBuilder {
                    min: 0,
                    max: 1,
                    area,
                    next: None,
                }
                .build(),
            })
            .unwrap();
    }

    #[test]
    fn erosion_removes_a_band_along_the_border() {
        let mut compact = flat_field(8.0);
        compact.erode_walkable_area(2);

        for z in 0..compact.height {
            for x in 0..compact.width {
                let i = compact.cell_at(x, z).index() as usize;
                let distance_to_edge = x
                    .min(z)
                    .min(compact.width - 1 - x)
                    .min(compact.height - 1 - z);
                // Radius 2 eats the outer two rings.
                assert_eq!(
                    compact.areas[i].is_walkable(),
                    distance_to_edge >= 2,
                    "unexpected area at ({x}, {z})"
                );
            }
        }
    }

    #[test]
    fn erosion_by_zero_keeps_interior() {
        let mut compact = flat_field(4.0);
        compact.erode_walkable_area(0);
        let walkable = compact.areas.iter().filter(|a| a.is_walkable()).count();
        assert_eq!(walkable, 16);
    }

    #[test]
    fn median_filter_removes_single_span_noise() {
        let mut compact = flat_field(5.0);
        let center = compact.cell_at(2, 2).index() as usize;
        compact.areas[center] = AreaType(7);

        compact.median_filter_walkable_area();

        assert_eq!(compact.areas[center], AreaType::DEFAULT_WALKABLE);
    }

    #[test]
    fn median_filter_keeps_homogeneous_patches() {
        let mut compact = flat_field(5.0);
        for z in 0..3_u16 {
            for x in 0..3_u16 {
                let i = compact.cell_at(x, z).index() as usize;
                compact.areas[i] = AreaType(7);
            }
        }
        compact.median_filter_walkable_area();
        let corner = compact.cell_at(0, 0).index() as usize;
        let center = compact.cell_at(1, 1).index() as usize;
        assert_eq!(compact.areas[corner], AreaType(7));
        assert_eq!(compact.areas[center], AreaType(7));
    }

    #[test]
    fn box_volume_tags_contained_spans() {
        let mut compact = flat_field(6.0);
        compact.mark_box_area(
            Aabb3d {
                min: Vec3A::new(1.0, 0.0, 1.0),
                max: Vec3A::new(3.0, 3.0, 3.0),
            },
            AreaType(5),
        );

        let inside = compact.cell_at(2, 2).index() as usize;
        let outside = compact.cell_at(5, 5).index() as usize;
        assert_eq!(compact.areas[inside], AreaType(5));
        assert_eq!(compact.areas[outside], AreaType::DEFAULT_WALKABLE);
    }

    #[test]
    fn box_volume_below_the_floor_tags_nothing() {
        let mut compact = flat_field(6.0);
        compact.mark_box_area(
            Aabb3d {
                min: Vec3A::new(0.0, -5.0, 0.0),
                max: Vec3A::new(6.0, -2.0, 6.0),
            },
            AreaType(5),
        );
        assert!(compact.areas.iter().all(|a| *a == AreaType::DEFAULT_WALKABLE));
    }

    #[test]
    fn cylinder_volume_tags_a_disc() {
        let mut compact = flat_field(9.0);
        compact.mark_cylinder_area(Vec3A::new(4.5, 0.0, 4.5), 2.0, 2.0, AreaType(3));

        let center = compact.cell_at(4, 4).index() as usize;
        let corner = compact.cell_at(0, 0).index() as usize;
        let rim = compact.cell_at(8, 4).index() as usize;
        assert_eq!(compact.areas[center], AreaType(3));
        assert_eq!(compact.areas[corner], AreaType::DEFAULT_WALKABLE);
        assert_eq!(compact.areas[rim], AreaType::DEFAULT_WALKABLE);
    }

    #[test]
    fn convex_volume_tags_contained_spans() {
        let mut compact = flat_field(8.0);
        let volume = ConvexVolume {
            vertices: vec![
                Vec2::new(1.0, 1.0),
                Vec2::new(6.0, 1.0),
                Vec2::new(6.0, 6.0),
                Vec2::new(1.0, 6.0),
            ],
            min_y: 0.0,
            max_y: 3.0,
            area: AreaType(9),
        };
        compact.mark_convex_poly_area(&volume);

        let inside = compact.cell_at(3, 3).index() as usize;
        let outside = compact.cell_at(7, 7).index() as usize;
        assert_eq!(compact.areas[inside], AreaType(9));
        assert_eq!(compact.areas[outside], AreaType::DEFAULT_WALKABLE);
    }

    #[test]
    fn point_in_poly_matches_square() {
        let square = [
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(0.0, 2.0),
        ];
        assert!(point_in_poly(Vec2::new(1.0, 1.0), &square));
        assert!(!point_in_poly(Vec2::new(3.0, 1.0), &square));
        assert!(!point_in_poly(Vec2::new(-1.0, -1.0), &square));
    }
}
