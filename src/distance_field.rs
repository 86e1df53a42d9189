//! The distance field over the walkable surface, feeding the watershed
//! region partitioning.

use crate::compact_heightfield::CompactHeightfield;

impl CompactHeightfield {
    /// Calculates the chessboard distance from every span to the nearest
    /// unwalkable span or boundary, then smooths the field with a box blur.
    ///
    /// Stores the result in [`CompactHeightfield::dist`] and records the
    /// maximum in [`CompactHeightfield::max_distance`]. Must run before
    /// [`CompactHeightfield::build_regions`](crate::CompactHeightfield::build_regions).
    pub fn build_distance_field(&mut self) {
        let mut src = vec![0_u16; self.spans.len()];

        self.max_distance = self.calculate_distance_field(&mut src);

        // The blur reads src and writes dst; dst becomes the final field.
        let mut dst = vec![0_u16; self.spans.len()];
        self.box_blur(1, &src, &mut dst);
        self.dist = dst;
    }

    /// Two-pass chamfer over the connection graph; axial steps cost 2,
    /// diagonal steps 3. Returns the maximum distance found.
    fn calculate_distance_field(&self, src: &mut [u16]) -> u16 {
        // Init distance: 0 at the boundary, "far" everywhere else.
        src.fill(u16::MAX);
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    let area = self.areas[i];
                    let span = &self.spans[i];

                    let mut neighbor_count = 0;
                    for dir in 0..4 {
                        let Some(con) = span.con(dir) else {
                            continue;
                        };
                        let (_, _, a_i) = self.con_indices(x as i32, z as i32, dir, con);
                        if area == self.areas[a_i] {
                            neighbor_count += 1;
                        }
                    }
                    if neighbor_count != 4 {
                        src[i] = 0;
                    }
                }
            }
        }

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
                        src[i] = src[i].min(src[a_i].saturating_add(2));
                        // (-1, -1)
                        if let Some(con) = self.spans[a_i].con(3) {
                            let (_, _, aa_i) = self.con_indices(ax, az, 3, con);
                            src[i] = src[i].min(src[aa_i].saturating_add(3));
                        }
                    }
                    if let Some(con) = span.con(3) {
                        // (0, -1)
                        let (ax, az, a_i) = self.con_indices(x as i32, z as i32, 3, con);
                        src[i] = src[i].min(src[a_i].saturating_add(2));
                        // (1, -1)
                        if let Some(con) = self.spans[a_i].con(2) {
                            let (_, _, aa_i) = self.con_indices(ax, az, 2, con);
                            src[i] = src[i].min(src[aa_i].saturating_add(3));
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
                        src[i] = src[i].min(src[a_i].saturating_add(2));
                        // (1, 1)
                        if let Some(con) = self.spans[a_i].con(1) {
                            let (_, _, aa_i) = self.con_indices(ax, az, 1, con);
                            src[i] = src[i].min(src[aa_i].saturating_add(3));
                        }
                    }
                    if let Some(con) = span.con(1) {
                        // (0, 1)
                        let (ax, az, a_i) = self.con_indices(x as i32, z as i32, 1, con);
                        src[i] = src[i].min(src[a_i].saturating_add(2));
                        // (-1, 1)
                        if let Some(con) = self.spans[a_i].con(0) {
                            let (_, _, aa_i) = self.con_indices(ax, az, 0, con);
                            src[i] = src[i].min(src[aa_i].saturating_add(3));
                        }
                    }
                }
            }
        }

        src.iter().copied().max().unwrap_or(0)
    }

    /// Averages each span's distance with its eight connected neighbors.
    /// Spans with a distance of at most `threshold * 2` are left untouched to
    /// keep the boundary crisp.
    fn box_blur(&self, threshold: u16, src: &[u16], dst: &mut [u16]) {
        let threshold = threshold * 2;

        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    let span = &self.spans[i];
                    let center_distance = src[i];
                    if center_distance <= threshold {
                        dst[i] = center_distance;
                        continue;
                    }

                    let mut total = center_distance as u32;
                    for dir in 0..4 {
                        let Some(con) = span.con(dir) else {
                            // Missing neighbors weigh in with the center value.
                            total += center_distance as u32 * 2;
                            continue;
                        };
                        let (ax, az, a_i) = self.con_indices(x as i32, z as i32, dir, con);
                        total += src[a_i] as u32;

                        let dir_diag = (dir + 1) & 0x3;
                        if let Some(con) = self.spans[a_i].con(dir_diag) {
                            let (_, _, aa_i) = self.con_indices(ax, az, dir_diag, con);
                            total += src[aa_i] as u32;
                        } else {
                            total += center_distance as u32;
                        }
                    }
                    dst[i] = ((total + 5) / 9) as u16;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        compact_heightfield::CompactHeightfield,
        heightfield::{HeightfieldBuilder, SpanInsertion},
        math::Aabb3d,
        span::{AreaType, SpanBuilder},
    };

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
                heightfield
                    .add_span(SpanInsertion {
                        x,
                        z,
                        flag_merge_threshold: 0,
                        span: SpanBuilder {
                            min: 0,
                            max: 1,
                            area: AreaType::DEFAULT_WALKABLE,
                            next: None,
                        }
                        .build(),
                    })
                    .unwrap();
            }
        }
        heightfield.into_compact(2, 1).unwrap()
    }

    #[test]
    fn distance_grows_towards_the_center() {
        let mut compact = flat_field(9.0);
        compact.build_distance_field();

        let center = compact.cell_at(4, 4).index() as usize;
        let edge = compact.cell_at(0, 4).index() as usize;
        assert_eq!(compact.dist[edge], 0);
        assert!(compact.dist[center] > compact.dist[edge]);
        assert_eq!(
            compact.max_distance,
            compact.dist.iter().copied().max().unwrap()
        );
    }

    #[test]
    fn distance_field_is_symmetric_on_a_square() {
        let mut compact = flat_field(9.0);
        compact.build_distance_field();

        for z in 0..compact.height {
            for x in 0..compact.width {
                let i = compact.cell_at(x, z).index() as usize;
                let mirrored = compact
                    .cell_at(compact.width - 1 - x, compact.height - 1 - z)
                    .index() as usize;
                assert_eq!(compact.dist[i], compact.dist[mirrored]);
            }
        }
    }

    #[test]
    fn empty_field_has_no_distance() {
        let heightfield = HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::ZERO,
                max: Vec3A::new(4.0, 4.0, 4.0),
            },
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        let mut compact = heightfield.into_compact(2, 1).unwrap();
        compact.build_distance_field();
        assert_eq!(compact.max_distance, 0);
        assert!(compact.dist.is_empty());
    }
}
