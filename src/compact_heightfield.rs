//! The compact heightfield: a dense, indexed view of the open space above
//! the solid spans, with 4-direction neighbor links.

use crate::{
    compact_cell::CompactCell,
    compact_span::{CompactSpan, NeighborLinks},
    heightfield::Heightfield,
    math::{Aabb3d, dir_offset_x, dir_offset_z},
    region::RegionId,
    span::AreaType,
};

/// A packed representation of the open space of a [`Heightfield`].
#[derive(Debug, Clone)]
pub struct CompactHeightfield {
    /// The width of the heightfield along the x-axis in cell units
    pub width: u16,
    /// The height of the heightfield along the z-axis in cell units
    pub height: u16,
    /// The walkable height used during the build of the field
    pub walkable_height: u16,
    /// The walkable climb used during the build of the field.
    pub walkable_climb: u16,
    /// The AABB border size used during the build of the field.
    pub border_size: u16,
    /// The maximum distance value of any span within the field.
    pub max_distance: u16,
    /// The maximum region id of any span within the field.
    pub max_region: RegionId,
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The cells in the heightfield [Size: `width * height`]
    pub cells: Vec<CompactCell>,
    /// All walkable spans in the heightfield
    pub spans: Vec<CompactSpan>,
    /// Border distance data. [Size: `spans.len()`]
    pub dist: Vec<u16>,
    /// Area type data. [Size: `spans.len()`]
    pub areas: Vec<AreaType>,
}

impl Heightfield {
    /// Flattens the open space above the walkable spans of this heightfield
    /// into a [`CompactHeightfield`] and links 4-direction neighbors.
    ///
    /// Two open spans in adjacent columns are linked when their vertical
    /// overlap is at least `walkable_height` and the difference between their
    /// floors is at most `walkable_climb`.
    ///
    /// # Errors
    ///
    /// Returns an error if any column has too many linked layers to address
    /// with the 6-bit connection encoding.
    pub fn into_compact(
        self,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<CompactHeightfield, CompactHeightfieldError> {
        const MAX_HEIGHT: u16 = u16::MAX;
        let walkable_span_count = self
            .allocated_spans
            .values()
            .filter(|span| span.area().is_walkable())
            .count();

        let mut compact = CompactHeightfield {
            width: self.width,
            height: self.height,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_distance: 0,
            max_region: RegionId::NONE,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            cells: vec![CompactCell::default(); self.width as usize * self.height as usize],
            spans: vec![CompactSpan::default(); walkable_span_count],
            dist: Vec::new(),
            areas: vec![AreaType::NOT_WALKABLE; walkable_span_count],
        };
        // Make room for the agent standing on the topmost floor.
        compact.aabb.max.y += walkable_height as f32 * compact.cell_height;

        // Fill in cells and spans.
        let mut span_index = 0_usize;
        for z in 0..self.height {
            for x in 0..self.width {
                let Some(span_key) = self.span_key_at(x, z) else {
                    // No spans in this column; leave the cell at index=0, count=0.
                    continue;
                };
                let column_index = self.column_index(x, z);
                let cell = &mut compact.cells[column_index];
                cell.set_index(span_index as u32);
                cell.set_count(0);

                let mut span_key_iter = Some(span_key);
                while let Some(span_key) = span_key_iter {
                    let span = self.span(span_key);
                    span_key_iter = span.next();
                    if !span.area().is_walkable() {
                        continue;
                    }
                    let bot = span.max();
                    let top = span
                        .next()
                        .map(|key| self.span(key).min())
                        .unwrap_or(MAX_HEIGHT);
                    compact.spans[span_index].y = bot;
                    let height = top.saturating_sub(bot).min(u8::MAX.into()) as u8;
                    compact.spans[span_index].height = height;
                    compact.areas[span_index] = span.area();
                    span_index += 1;
                    cell.inc_count();
                }
            }
        }

        // Find neighbor connections.
        const MAX_LAYERS: u8 = NeighborLinks::NOT_CONNECTED - 1;
        let mut max_layer_index = 0_u32;
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = compact.cells[x as usize + z as usize * self.width as usize];
                for i in cell.index_range() {
                    for dir in 0..4_u8 {
                        compact.spans[i].set_con(dir, None);
                        let neighbor_x = x as i32 + dir_offset_x(dir) as i32;
                        let neighbor_z = z as i32 + dir_offset_z(dir) as i32;
                        if !self.contains(neighbor_x, neighbor_z) {
                            continue;
                        }

                        // Iterate over all neighbor spans and check if any of
                        // them is accessible from the current cell.
                        let column_index = self.column_index(neighbor_x as u16, neighbor_z as u16);
                        let neighbor_cell = compact.cells[column_index];
                        let span = compact.spans[i].clone();
                        for k in neighbor_cell.index_range() {
                            let neighbor_span = &compact.spans[k];
                            let bot = span.y.max(neighbor_span.y);
                            let top = (span.y as u32 + span.height as u32)
                                .min(neighbor_span.y as u32 + neighbor_span.height as u32);

                            // Check that the gap between the spans is walkable,
                            // and that the climb between the floors is not too high.
                            let is_walkable =
                                top as i32 - bot as i32 >= walkable_height as i32;
                            let is_climbable = (neighbor_span.y as i32 - span.y as i32).abs()
                                <= walkable_climb as i32;
                            if !is_walkable || !is_climbable {
                                continue;
                            }
                            // Mark direction as walkable.
                            let layer_index = k as i32 - neighbor_cell.index() as i32;
                            if !(0..MAX_LAYERS as i32).contains(&layer_index) {
                                max_layer_index = max_layer_index.max(layer_index as u32);
                                continue;
                            }
                            compact.spans[i].set_con(dir, Some(layer_index as u8));
                            break;
                        }
                    }
                }
            }
        }
        if max_layer_index > MAX_LAYERS as u32 {
            return Err(CompactHeightfieldError::TooManyLayers {
                max_layer_index: MAX_LAYERS,
                layer_index: max_layer_index,
            });
        }
        Ok(compact)
    }
}

impl CompactHeightfield {
    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    /// Returns the cell at the given coordinates. Panics if the coordinates are invalid.
    #[inline]
    pub fn cell_at(&self, x: u16, z: u16) -> &CompactCell {
        &self.cells[self.column_index(x, z)]
    }

    /// The index of the span connected to span `i` in direction `dir`, along
    /// with its cell coordinates. The connection must exist.
    #[inline]
    pub(crate) fn con_indices(&self, x: i32, z: i32, dir: u8, con: u8) -> (i32, i32, usize) {
        let neighbor_x = x + dir_offset_x(dir) as i32;
        let neighbor_z = z + dir_offset_z(dir) as i32;
        let cell_index = (neighbor_x + neighbor_z * self.width as i32) as usize;
        let neighbor_index = self.cells[cell_index].index() as usize + con as usize;
        (neighbor_x, neighbor_z, neighbor_index)
    }
}

/// Errors that can occur when building a [`CompactHeightfield`].
#[derive(Debug, thiserror::Error)]
pub enum CompactHeightfieldError {
    /// The heightfield has too many layers.
    #[error(
        "Heightfield has too many layers. Max layer index is {max_layer_index}, but got {layer_index}"
    )]
    TooManyLayers {
        /// The maximum layer index.
        max_layer_index: u8,
        /// The layer index that caused the error.
        layer_index: u32,
    },
}
