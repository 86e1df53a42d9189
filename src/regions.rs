//! Partitioning of the walkable surface into connected, labeled regions.
//!
//! Two partitioners are provided:
//!   - watershed over the distance field: the nicest tessellation, usually
//!     the slowest. The best choice for precomputed navmeshes with large
//!     open areas.
//!   - monotone sweep: fastest, guarantees regions without holes, but may
//!     produce long thin regions along diagonal walls.

use thiserror::Error;

use crate::{compact_heightfield::CompactHeightfield, region::RegionId, span::AreaType};

impl CompactHeightfield {
    /// Partitions the walkable surface into regions using watershed
    /// partitioning over the distance field.
    ///
    /// Non-null regions consist of connected, non-overlapping walkable spans
    /// that form a single contour.
    ///
    /// If multiple regions form an area that is smaller than
    /// `min_region_area`, all their spans are re-assigned to
    /// [`AreaType::NOT_WALKABLE`]. Watershed partitioning can result in
    /// smaller than necessary regions, especially in diagonal corridors;
    /// regions smaller than `merge_region_area` are absorbed into a neighbor
    /// where possible.
    ///
    /// The distance field must be built with
    /// [`CompactHeightfield::build_distance_field`] first.
    pub fn build_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionError> {
        const EXPAND_ITERS: u16 = 8;

        if self.dist.len() != self.spans.len() {
            return Err(RegionError::MissingDistanceField);
        }

        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut src_dist = vec![0_u16; self.spans.len()];
        let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);

        let mut region_id: u16 = 1;
        let mut level = (self.max_distance + 1) & !1;

        if border_size > 0 {
            region_id = self.paint_borders(border_size, region_id, &mut src_reg);
        }
        self.border_size = border_size;

        while level > 0 {
            level = level.saturating_sub(2);

            // Expand current regions until no empty connected cells are found.
            self.expand_regions(EXPAND_ITERS, level, &mut src_reg, &mut src_dist, &mut stack);

            // Mark new regions with ids.
            for z in 0..self.height {
                for x in 0..self.width {
                    let cell = *self.cell_at(x, z);
                    for i in cell.index_range() {
                        if self.dist[i] < level
                            || src_reg[i] != RegionId::NONE
                            || !self.areas[i].is_walkable()
                        {
                            continue;
                        }
                        if self.flood_region(
                            x,
                            z,
                            i,
                            level,
                            RegionId::from(region_id),
                            &mut src_reg,
                            &mut src_dist,
                        ) {
                            region_id = region_id
                                .checked_add(1)
                                .filter(|id| (id & RegionId::BORDER.bits()) == 0)
                                .ok_or(RegionError::TooManyRegions)?;
                        }
                    }
                }
            }
        }

        // Expand the final regions over everything that is left.
        self.expand_regions(
            EXPAND_ITERS * 8,
            0,
            &mut src_reg,
            &mut src_dist,
            &mut stack,
        );

        let max_region =
            self.merge_and_filter_regions(min_region_area, merge_region_area, region_id, &mut src_reg)?;
        self.max_region = RegionId::from(max_region);

        // Write the result out.
        for (span, region) in self.spans.iter_mut().zip(&src_reg) {
            span.region = *region;
        }

        Ok(())
    }

    /// Partitions the walkable surface into regions by sweeping the grid one
    /// row at a time, without a distance field.
    ///
    /// Within each row, every maximal run of connected walkable spans with
    /// the same area becomes a sweep; sweeps that pair uniquely with a region
    /// of the previous row adopt its id, everything else starts a new region.
    /// The same small-region filtering as [`CompactHeightfield::build_regions`]
    /// runs afterwards.
    pub fn build_regions_monotone(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionError> {
        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut region_id: u16 = 1;

        if border_size > 0 {
            region_id = self.paint_borders(border_size, region_id, &mut src_reg);
        }
        self.border_size = border_size;

        let mut sweeps: Vec<SweepSpan> = Vec::new();
        // Links from previous-row region id to the number of sweep samples
        // that saw it.
        let mut prev_count: Vec<u32> = Vec::new();

        // The painted border band keeps its ids; sweep only the interior.
        let z_range = border_size..self.height.saturating_sub(border_size);
        let x_range = border_size..self.width.saturating_sub(border_size);

        for z in z_range {
            prev_count.clear();
            prev_count.resize(region_id as usize + 1, 0);
            sweeps.clear();
            // Sweep id 0 is unused so that "no sweep" can stay 0.
            sweeps.push(SweepSpan::default());
            let mut row_id: u16 = 1;

            for x in x_range.clone() {
                let cell = *self.cell_at(x, z);
                for i in cell.index_range() {
                    if !self.areas[i].is_walkable() {
                        continue;
                    }
                    let span = self.spans[i].clone();

                    // Continue the run of the -x neighbor if it agrees.
                    let mut sweep_id = 0_u16;
                    if let Some(con) = span.con(0) {
                        let (_, _, a_i) = self.con_indices(x as i32, z as i32, 0, con);
                        let neighbor_reg = src_reg[a_i];
                        if neighbor_reg != RegionId::NONE
                            && !neighbor_reg.contains(RegionId::BORDER)
                            && self.areas[i] == self.areas[a_i]
                        {
                            sweep_id = neighbor_reg.bits();
                        }
                    }
                    if sweep_id == 0 {
                        sweep_id = row_id;
                        row_id += 1;
                        sweeps.push(SweepSpan::default());
                    }

                    // Link to the -z row.
                    if let Some(con) = span.con(3) {
                        let (_, _, a_i) = self.con_indices(x as i32, z as i32, 3, con);
                        let above = src_reg[a_i];
                        if above != RegionId::NONE
                            && !above.contains(RegionId::BORDER)
                            && self.areas[i] == self.areas[a_i]
                        {
                            let sweep = &mut sweeps[sweep_id as usize];
                            match sweep.neighbor {
                                SweepNeighbor::None => {
                                    sweep.neighbor = SweepNeighbor::Unique(above);
                                    sweep.samples += 1;
                                    prev_count[above.bits() as usize] += 1;
                                }
                                SweepNeighbor::Unique(existing) if existing == above => {
                                    sweep.samples += 1;
                                    prev_count[above.bits() as usize] += 1;
                                }
                                _ => sweep.neighbor = SweepNeighbor::Conflict,
                            }
                        }
                    }

                    src_reg[i] = RegionId::from(sweep_id);
                }
            }

            // Resolve row-local sweeps into global region ids.
            for sweep in &mut sweeps[1..row_id as usize] {
                sweep.id = match sweep.neighbor {
                    // Adopt the previous-row region only if the pairing is
                    // exclusive in both directions.
                    SweepNeighbor::Unique(above)
                        if prev_count[above.bits() as usize] == sweep.samples =>
                    {
                        above
                    }
                    _ => {
                        let id = RegionId::from(region_id);
                        region_id = region_id
                            .checked_add(1)
                            .filter(|id| (id & RegionId::BORDER.bits()) == 0)
                            .ok_or(RegionError::TooManyRegions)?;
                        id
                    }
                };
            }

            // Remap the row to the resolved ids.
            for x in x_range.clone() {
                let cell = *self.cell_at(x, z);
                for i in cell.index_range() {
                    let raw = src_reg[i].bits();
                    if raw > 0 && raw < row_id && !src_reg[i].contains(RegionId::BORDER) {
                        src_reg[i] = sweeps[raw as usize].id;
                    }
                }
            }
        }

        let max_region =
            self.merge_and_filter_regions(min_region_area, merge_region_area, region_id, &mut src_reg)?;
        self.max_region = RegionId::from(max_region);

        for (span, region) in self.spans.iter_mut().zip(&src_reg) {
            span.region = *region;
        }

        Ok(())
    }

    /// Paints the four border rectangles with dedicated border regions.
    /// Returns the next free region id.
    fn paint_borders(&self, border_size: u16, mut region_id: u16, src_reg: &mut [RegionId]) -> u16 {
        // Make sure the border does not overflow.
        let border_width = border_size.min(self.width);
        let border_height = border_size.min(self.height);

        self.paint_rect_region(
            0,
            border_width,
            0,
            self.height,
            RegionId::from(region_id) | RegionId::BORDER,
            src_reg,
        );
        region_id += 1;
        self.paint_rect_region(
            self.width - border_width,
            self.width,
            0,
            self.height,
            RegionId::from(region_id) | RegionId::BORDER,
            src_reg,
        );
        region_id += 1;
        self.paint_rect_region(
            0,
            self.width,
            0,
            border_height,
            RegionId::from(region_id) | RegionId::BORDER,
            src_reg,
        );
        region_id += 1;
        self.paint_rect_region(
            0,
            self.width,
            self.height - border_height,
            self.height,
            RegionId::from(region_id) | RegionId::BORDER,
            src_reg,
        );
        region_id += 1;
        region_id
    }

    fn paint_rect_region(
        &self,
        min_x: u16,
        max_x: u16,
        min_z: u16,
        max_z: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
    ) {
        for z in min_z..max_z {
            for x in min_x..max_x {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    if self.areas[i].is_walkable() {
                        src_reg[i] = region;
                    }
                }
            }
        }
    }

    /// Grows every existing region into unassigned spans whose distance is at
    /// least `level`, for at most `max_iter` synchronous rounds.
    fn expand_regions(
        &self,
        max_iter: u16,
        level: u16,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
    ) {
        // Find cells revealed by the lowered level.
        stack.clear();
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    if self.dist[i] >= level
                        && src_reg[i] == RegionId::NONE
                        && self.areas[i].is_walkable()
                    {
                        stack.push(LevelStackEntry {
                            x,
                            z,
                            index: Some(i),
                        });
                    }
                }
            }
        }

        let mut dirty_entries = Vec::new();
        let mut iter = 0;
        while !stack.is_empty() {
            let mut failed = 0;
            dirty_entries.clear();

            for entry in stack.iter_mut() {
                let x = entry.x;
                let z = entry.z;
                let Some(i) = entry.index else {
                    failed += 1;
                    continue;
                };

                let mut region = src_reg[i];
                let mut distance = u16::MAX;
                let area = self.areas[i];
                let span = &self.spans[i];
                for dir in 0..4 {
                    let Some(con) = span.con(dir) else {
                        continue;
                    };
                    let (_, _, a_i) = self.con_indices(x as i32, z as i32, dir, con);
                    if self.areas[a_i] != area {
                        continue;
                    }
                    let neighbor_region = src_reg[a_i];
                    if neighbor_region != RegionId::NONE
                        && !neighbor_region.contains(RegionId::BORDER)
                        && src_dist[a_i] + 2 < distance
                    {
                        region = neighbor_region;
                        distance = src_dist[a_i] + 2;
                    }
                }
                if region != RegionId::NONE {
                    // Mark as used.
                    entry.index = None;
                    dirty_entries.push(DirtyEntry {
                        index: i,
                        region,
                        distance,
                    });
                } else {
                    failed += 1;
                }
            }
            // Apply the updates after the sweep so every entry of this round
            // saw the same state.
            for dirty in &dirty_entries {
                src_reg[dirty.index] = dirty.region;
                src_dist[dirty.index] = dirty.distance;
            }

            if failed == stack.len() {
                break;
            }

            if level > 0 {
                iter += 1;
                if iter >= max_iter {
                    break;
                }
            }
        }
    }

    /// Flood fills a new region from the seed span across connected walkable
    /// spans with the same area and a distance of at least `level - 2`.
    ///
    /// Returns whether the region kept any spans. The fill retreats from
    /// spans that touch a different existing region, so competing seeds
    /// partition cleanly.
    #[expect(clippy::too_many_arguments)]
    fn flood_region(
        &self,
        x: u16,
        z: u16,
        i: usize,
        level: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
    ) -> bool {
        let area = self.areas[i];

        let mut stack = vec![(x as i32, z as i32, i)];
        src_reg[i] = region;
        src_dist[i] = 0;

        let expand_level = level.saturating_sub(2);
        let mut count = 0;

        while let Some((cx, cz, ci)) = stack.pop() {
            let span = self.spans[ci].clone();

            // Check if any of the neighbors already have a valid region set.
            let mut adjacent_region = RegionId::NONE;
            for dir in 0..4 {
                // 8-connected.
                let Some(con) = span.con(dir) else {
                    continue;
                };
                let (ax, az, a_i) = self.con_indices(cx, cz, dir, con);
                if self.areas[a_i] != area {
                    continue;
                }
                let neighbor_region = src_reg[a_i];
                // Do not take borders into account.
                if neighbor_region.contains(RegionId::BORDER) {
                    continue;
                }
                if neighbor_region != RegionId::NONE && neighbor_region != region {
                    adjacent_region = neighbor_region;
                }
                let dir_diag = (dir + 1) & 0x3;
                if let Some(con) = self.spans[a_i].con(dir_diag) {
                    let (_, _, aa_i) = self.con_indices(ax, az, dir_diag, con);
                    if self.areas[aa_i] != area {
                        continue;
                    }
                    let diagonal_region = src_reg[aa_i];
                    if diagonal_region != RegionId::NONE
                        && !diagonal_region.contains(RegionId::BORDER)
                        && diagonal_region != region
                    {
                        adjacent_region = diagonal_region;
                    }
                }
            }
            if adjacent_region != RegionId::NONE {
                src_reg[ci] = RegionId::NONE;
                continue;
            }
            count += 1;

            // Expand neighbors.
            for dir in 0..4 {
                let Some(con) = span.con(dir) else {
                    continue;
                };
                let (ax, az, a_i) = self.con_indices(cx, cz, dir, con);
                if self.areas[a_i] != area {
                    continue;
                }
                if self.dist[a_i] >= expand_level && src_reg[a_i] == RegionId::NONE {
                    src_reg[a_i] = region;
                    src_dist[a_i] = 0;
                    stack.push((ax, az, a_i));
                }
            }
        }

        count > 0
    }

    /// Removes regions below `min_region_area`, merges regions below
    /// `merge_region_area` into suitable neighbors, and compresses the ids.
    /// Returns the highest region id in use afterwards.
    fn merge_and_filter_regions(
        &self,
        min_region_area: u16,
        merge_region_area: u16,
        max_region_id: u16,
        src_reg: &mut [RegionId],
    ) -> Result<u16, RegionError> {
        let nreg = max_region_id as usize + 1;
        let mut regions: Vec<Region> = (0..nreg as u16).map(|id| Region::new(RegionId::from(id))).collect();

        // Gather region statistics, boundary walks, and floor overlaps.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = *self.cell_at(x, z);
                for i in cell.index_range() {
                    let r = src_reg[i];
                    if r == RegionId::NONE || r.bits() as usize >= nreg {
                        continue;
                    }
                    regions[r.bits() as usize].span_count += 1;

                    // Update floors: other regions in the same column overlap
                    // this one vertically and must never be merged with it.
                    for j in cell.index_range() {
                        if i == j {
                            continue;
                        }
                        let floor_id = src_reg[j];
                        if floor_id == RegionId::NONE || floor_id.bits() as usize >= nreg {
                            continue;
                        }
                        add_unique(&mut regions[r.bits() as usize].floors, floor_id);
                    }

                    // Trace the region's boundary once, from the first
                    // boundary span found.
                    if !regions[r.bits() as usize].connections.is_empty() {
                        continue;
                    }
                    regions[r.bits() as usize].area = self.areas[i];
                    let edge_dir =
                        (0..4).find(|dir| self.is_solid_edge(src_reg, x, z, i, *dir));
                    if let Some(dir) = edge_dir {
                        let mut connections = Vec::new();
                        self.walk_region_boundary(x, z, i, dir, src_reg, &mut connections);
                        regions[r.bits() as usize].connections = connections;
                    }
                }
            }
        }

        // Remove too-small clusters of connected regions. Regions touching a
        // tile border are kept because their true size is unknown.
        let mut stack = Vec::with_capacity(32);
        let mut trace = Vec::with_capacity(32);
        for i in 0..nreg {
            if regions[i].id == RegionId::NONE
                || regions[i].id.contains(RegionId::BORDER)
                || regions[i].span_count == 0
                || regions[i].visited
            {
                continue;
            }

            let mut connects_to_border = false;
            let mut span_count = 0;
            stack.clear();
            trace.clear();
            regions[i].visited = true;
            stack.push(i);

            while let Some(ri) = stack.pop() {
                span_count += regions[ri].span_count;
                trace.push(ri);
                let connections = regions[ri].connections.clone();
                for connection in connections {
                    if connection.contains(RegionId::BORDER) {
                        connects_to_border = true;
                        continue;
                    }
                    let neighbor = &mut regions[connection.bits() as usize];
                    if neighbor.visited
                        || neighbor.id == RegionId::NONE
                        || neighbor.id.contains(RegionId::BORDER)
                    {
                        continue;
                    }
                    neighbor.visited = true;
                    stack.push(connection.bits() as usize);
                }
            }

            if span_count < min_region_area as usize && !connects_to_border {
                for &ri in &trace {
                    regions[ri].span_count = 0;
                    regions[ri].id = RegionId::NONE;
                }
            }
        }

        // Merge too-small regions into neighbors.
        loop {
            let mut merged_any = false;
            for i in 0..nreg {
                let region = &regions[i];
                if region.id == RegionId::NONE
                    || region.id.contains(RegionId::BORDER)
                    || region.span_count == 0
                {
                    continue;
                }
                // Keep large regions whose boundary reaches unwalkable space;
                // everything else is a merge candidate.
                if region.span_count > merge_region_area as usize
                    && region.connections.contains(&RegionId::NONE)
                {
                    continue;
                }

                // Pick the mergeable neighbor sharing the longest boundary.
                // Connections are scanned in ascending id order, so equal
                // lengths resolve to the smallest id.
                let mut candidates: Vec<RegionId> = region
                    .connections
                    .iter()
                    .copied()
                    .filter(|c| !c.contains(RegionId::BORDER) && *c != RegionId::NONE)
                    .collect();
                candidates.sort_unstable();
                candidates.dedup();

                let mut best_len = 0;
                let mut merge_id = region.id;
                for candidate in candidates {
                    let neighbor = &regions[candidate.bits() as usize];
                    if neighbor.id == RegionId::NONE || neighbor.id.contains(RegionId::BORDER) {
                        continue;
                    }
                    if !can_merge(region, neighbor) || !can_merge(neighbor, region) {
                        continue;
                    }
                    let len = self.shared_boundary_length(src_reg, &regions, region.id, neighbor.id);
                    if len > best_len {
                        best_len = len;
                        merge_id = neighbor.id;
                    }
                }

                if merge_id != region.id {
                    let old_id = region.id;
                    let merge_index = merge_id.bits() as usize;
                    if merge_regions(&mut regions, merge_index, i) {
                        // Fix up regions pointing to the merged-away id.
                        for region in &mut regions {
                            if region.id == RegionId::NONE || region.id.contains(RegionId::BORDER)
                            {
                                continue;
                            }
                            if region.id == old_id {
                                region.id = merge_id;
                            }
                            replace_neighbor(region, old_id, merge_id);
                        }
                        merged_any = true;
                    }
                }
            }
            if !merged_any {
                break;
            }
        }

        // Compress region ids.
        for region in &mut regions {
            region.remap = false;
        }
        let mut next_id: u16 = 0;
        for i in 0..nreg {
            if regions[i].remap
                || regions[i].id == RegionId::NONE
                || regions[i].id.contains(RegionId::BORDER)
            {
                continue;
            }
            let old_id = regions[i].id;
            next_id += 1;
            let new_id = RegionId::from(next_id);
            for region in regions.iter_mut().skip(i) {
                if region.id == old_id {
                    region.remap = true;
                    region.id = new_id;
                }
            }
        }

        // Remap the spans.
        for region in src_reg.iter_mut() {
            if !region.contains(RegionId::BORDER) {
                *region = regions[region.bits() as usize].id;
            }
        }

        Ok(next_id)
    }

    /// Whether the edge of span `i` in direction `dir` borders another region.
    fn is_solid_edge(&self, src_reg: &[RegionId], x: u16, z: u16, i: usize, dir: u8) -> bool {
        let mut r = RegionId::NONE;
        if let Some(con) = self.spans[i].con(dir) {
            let (_, _, a_i) = self.con_indices(x as i32, z as i32, dir, con);
            r = src_reg[a_i];
        }
        r != src_reg[i]
    }

    /// Walks the boundary of a region, recording the sequence of neighboring
    /// region ids, one entry per maximal boundary segment.
    fn walk_region_boundary(
        &self,
        mut x: u16,
        mut z: u16,
        mut i: usize,
        mut dir: u8,
        src_reg: &[RegionId],
        contour: &mut Vec<RegionId>,
    ) {
        let start_dir = dir;
        let start_i = i;

        let mut current_region = RegionId::NONE;
        if let Some(con) = self.spans[i].con(dir) {
            let (_, _, a_i) = self.con_indices(x as i32, z as i32, dir, con);
            current_region = src_reg[a_i];
        }
        contour.push(current_region);

        // Bounded walk; bails out on malformed connectivity.
        for _ in 0..40_000 {
            if self.is_solid_edge(src_reg, x, z, i, dir) {
                let mut r = RegionId::NONE;
                if let Some(con) = self.spans[i].con(dir) {
                    let (_, _, a_i) = self.con_indices(x as i32, z as i32, dir, con);
                    r = src_reg[a_i];
                }
                if r != current_region {
                    current_region = r;
                    contour.push(r);
                }
                // Rotate clockwise.
                dir = (dir + 1) & 0x3;
            } else {
                let Some(con) = self.spans[i].con(dir) else {
                    // Should not happen: a non-solid edge has a connection.
                    return;
                };
                let (nx, nz, ni) = self.con_indices(x as i32, z as i32, dir, con);
                x = nx as u16;
                z = nz as u16;
                i = ni;
                // Rotate counterclockwise.
                dir = (dir + 3) & 0x3;
            }

            if start_i == i && start_dir == dir {
                break;
            }
        }

        // Remove adjacent duplicates, including the wrap-around pair.
        let mut j = 0;
        while contour.len() > 1 && j < contour.len() {
            let next = (j + 1) % contour.len();
            if contour[j] == contour[next] {
                contour.remove(next);
            } else {
                j += 1;
            }
        }
    }

    /// Counts the 4-connected boundary edges between the two regions,
    /// resolving span ids through any merges performed so far.
    fn shared_boundary_length(
        &self,
        src_reg: &[RegionId],
        regions: &[Region],
        a: RegionId,
        b: RegionId,
    ) -> usize {
        let resolve = |r: RegionId| -> RegionId {
            if r == RegionId::NONE || r.contains(RegionId::BORDER) {
                r
            } else {
                regions[r.bits() as usize].id
            }
        };
        let mut length = 0;
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    if resolve(src_reg[i]) != a {
                        continue;
                    }
                    let span = &self.spans[i];
                    for dir in 0..4 {
                        let Some(con) = span.con(dir) else {
                            continue;
                        };
                        let (_, _, a_i) = self.con_indices(x as i32, z as i32, dir, con);
                        if resolve(src_reg[a_i]) == b {
                            length += 1;
                        }
                    }
                }
            }
        }
        length
    }
}

/// Bookkeeping for one region during filtering and merging.
#[derive(Debug, Clone)]
struct Region {
    span_count: usize,
    id: RegionId,
    area: AreaType,
    remap: bool,
    visited: bool,
    /// The sequence of neighboring region ids along the region boundary.
    connections: Vec<RegionId>,
    /// Regions that overlap this one vertically in some column.
    floors: Vec<RegionId>,
}

impl Region {
    fn new(id: RegionId) -> Self {
        Self {
            span_count: 0,
            id,
            area: AreaType::NOT_WALKABLE,
            remap: false,
            visited: false,
            connections: Vec::new(),
            floors: Vec::new(),
        }
    }
}

fn add_unique(values: &mut Vec<RegionId>, value: RegionId) {
    if !values.contains(&value) {
        values.push(value);
    }
}

/// Two regions may merge when they share the same area type, border each
/// other along exactly one contiguous segment, and do not overlap vertically.
fn can_merge(region: &Region, candidate: &Region) -> bool {
    if region.area != candidate.area {
        return false;
    }
    let shared_segments = region
        .connections
        .iter()
        .filter(|c| **c == candidate.id)
        .count();
    if shared_segments != 1 {
        return false;
    }
    !region.floors.contains(&candidate.id)
}

/// Splices region `b` into region `a`, rotating both connection rings around
/// the shared segment. Returns whether the merge was performed.
fn merge_regions(regions: &mut [Region], a: usize, b: usize) -> bool {
    let a_id = regions[a].id;
    let b_id = regions[b].id;

    let a_connections = regions[a].connections.clone();
    let b_connections = regions[b].connections.clone();

    let Some(insert_a) = a_connections.iter().position(|c| *c == b_id) else {
        return false;
    };
    let Some(insert_b) = b_connections.iter().position(|c| *c == a_id) else {
        return false;
    };

    let mut merged = Vec::with_capacity(a_connections.len() + b_connections.len());
    let n = a_connections.len();
    for i in 0..n - 1 {
        merged.push(a_connections[(insert_a + 1 + i) % n]);
    }
    let n = b_connections.len();
    for i in 0..n - 1 {
        merged.push(b_connections[(insert_b + 1 + i) % n]);
    }
    // Collapse duplicates created by the splice.
    let mut j = 0;
    while merged.len() > 1 && j < merged.len() {
        let next = (j + 1) % merged.len();
        if merged[j] == merged[next] {
            merged.remove(next);
        } else {
            j += 1;
        }
    }

    let b_floors = regions[b].floors.clone();
    let b_span_count = regions[b].span_count;
    {
        let region = &mut regions[a];
        region.connections = merged;
        for floor in b_floors {
            add_unique(&mut region.floors, floor);
        }
        region.span_count += b_span_count;
    }
    regions[b].span_count = 0;
    regions[b].connections.clear();
    true
}

fn replace_neighbor(region: &mut Region, old_id: RegionId, new_id: RegionId) {
    let mut changed = false;
    for connection in &mut region.connections {
        if *connection == old_id {
            *connection = new_id;
            changed = true;
        }
    }
    for floor in &mut region.floors {
        if *floor == old_id {
            *floor = new_id;
        }
    }
    if changed {
        // Collapse runs made adjacent by the rename.
        let connections = &mut region.connections;
        let mut j = 0;
        while connections.len() > 1 && j < connections.len() {
            let next = (j + 1) % connections.len();
            if connections[j] == connections[next] {
                connections.remove(next);
            } else {
                j += 1;
            }
        }
    }
}

#[derive(Clone, Debug)]
struct LevelStackEntry {
    x: u16,
    z: u16,
    index: Option<usize>,
}

#[derive(Clone, Debug)]
struct DirtyEntry {
    index: usize,
    region: RegionId,
    distance: u16,
}

/// One maximal run of walkable spans within a monotone sweep row.
#[derive(Clone, Debug, Default)]
struct SweepSpan {
    id: RegionId,
    neighbor: SweepNeighbor,
    /// The number of samples agreeing on the unique neighbor.
    samples: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum SweepNeighbor {
    #[default]
    None,
    Unique(RegionId),
    Conflict,
}

/// Errors that can occur during region partitioning.
#[derive(Debug, Error)]
pub enum RegionError {
    /// More regions were created than fit in the 15-bit id space.
    #[error("region id space exhausted (more than {} regions)", 0x7fff)]
    TooManyRegions,
    /// Watershed partitioning was requested without a distance field.
    #[error("build_distance_field must run before build_regions")]
    MissingDistanceField,
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        compact_heightfield::CompactHeightfield,
        heightfield::{Heightfield, HeightfieldBuilder, SpanInsertion},
        math::Aabb3d,
        span::SpanBuilder,
    };

    use super::*;

    fn field(size: f32) -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::ZERO,
                max: Vec3A::new(size, 10.0, size),
            },
            cell_size: 1.0,
            cell_height: 0.5,
        }
        .build()
        .unwrap()
    }

    fn insert(heightfield: &mut Heightfield, x: u16, z: u16, min: u16, max: u16) {
        heightfield
            .add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: 1,
                span: SpanBuilder {
                    min,
                    max,
                    area: AreaType::DEFAULT_WALKABLE,
                    next: None,
                }
                .build(),
            })
            .unwrap();
    }

    fn flat_compact(size: f32) -> CompactHeightfield {
        let mut heightfield = field(size);
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                insert(&mut heightfield, x, z, 0, 1);
            }
        }
        heightfield.into_compact(3, 1).unwrap()
    }

    fn assert_connected_labels(compact: &CompactHeightfield) {
        // Every walkable span is labeled, and no two 4-connected spans with
        // different areas share a region.
        for (i, span) in compact.spans.iter().enumerate() {
            if compact.areas[i].is_walkable() {
                assert_ne!(span.region, RegionId::NONE, "unlabeled walkable span {i}");
            }
        }
    }

    #[test]
    fn flat_plane_is_a_single_region() {
        let mut compact = flat_compact(10.0);
        compact.build_distance_field();
        compact.build_regions(0, 8, 20).unwrap();

        assert_eq!(compact.max_region.bits(), 1);
        assert_connected_labels(&compact);
        let first = compact.spans[0].region;
        assert!(compact.spans.iter().all(|s| s.region == first));
    }

    #[test]
    fn separated_islands_get_distinct_regions() {
        let mut heightfield = field(16.0);
        // Two 5-wide platforms with a 6-cell gap.
        for z in 0..16 {
            for x in 0..5 {
                insert(&mut heightfield, x, z, 0, 1);
                insert(&mut heightfield, x + 11, z, 0, 1);
            }
        }
        let mut compact = heightfield.into_compact(3, 1).unwrap();
        compact.build_distance_field();
        compact.build_regions(0, 8, 20).unwrap();

        assert_eq!(compact.max_region.bits(), 2);
        assert_connected_labels(&compact);

        let left = compact.spans[compact.cell_at(0, 0).index() as usize].region;
        let right = compact.spans[compact.cell_at(12, 0).index() as usize].region;
        assert_ne!(left, right);
    }

    #[test]
    fn small_islands_are_dropped() {
        let mut heightfield = field(16.0);
        for z in 0..16 {
            for x in 0..16 {
                insert(&mut heightfield, x, z, 0, 1);
            }
        }
        // A lone span floating far above the floor.
        insert(&mut heightfield, 8, 8, 8, 9);

        let mut compact = heightfield.into_compact(3, 1).unwrap();
        compact.build_distance_field();
        compact.build_regions(0, 8, 20).unwrap();

        // Only the floor region remains; the floater was filtered out.
        assert_eq!(compact.max_region.bits(), 1);
        let floater = compact
            .spans
            .iter()
            .find(|s| s.y == 9)
            .expect("floating span exists");
        assert_eq!(floater.region, RegionId::NONE);
    }

    #[test]
    fn monotone_labels_flat_plane_as_one_region() {
        let mut compact = flat_compact(10.0);
        compact.build_regions_monotone(0, 8, 20).unwrap();

        assert_eq!(compact.max_region.bits(), 1);
        assert_connected_labels(&compact);
    }

    #[test]
    fn monotone_separates_islands() {
        let mut heightfield = field(16.0);
        for z in 0..16 {
            for x in 0..5 {
                insert(&mut heightfield, x, z, 0, 1);
                insert(&mut heightfield, x + 11, z, 0, 1);
            }
        }
        let mut compact = heightfield.into_compact(3, 1).unwrap();
        compact.build_regions_monotone(0, 8, 20).unwrap();

        assert_eq!(compact.max_region.bits(), 2);
    }

    #[test]
    fn border_size_paints_border_regions() {
        let mut compact = flat_compact(12.0);
        compact.build_distance_field();
        compact.build_regions(2, 0, 0).unwrap();

        let corner = compact.spans[compact.cell_at(0, 0).index() as usize].region;
        assert!(corner.contains(RegionId::BORDER));
        let center_index = compact.cell_at(6, 6).index() as usize;
        let center = compact.spans[center_index].region;
        assert!(!center.contains(RegionId::BORDER));
        assert_ne!(center, RegionId::NONE);
    }

    #[test]
    fn same_region_spans_are_connected() {
        let mut compact = flat_compact(12.0);
        compact.build_distance_field();
        compact.build_regions(0, 8, 20).unwrap();

        // BFS from one span of each region must reach every span of that
        // region through same-region links.
        let mut seen_region = vec![false; compact.max_region.bits() as usize + 1];
        let mut reached = vec![false; compact.spans.len()];
        for z in 0..compact.height {
            for x in 0..compact.width {
                let cell = *compact.cell_at(x, z);
                for i in cell.index_range() {
                    let region = compact.spans[i].region;
                    if region == RegionId::NONE || region.contains(RegionId::BORDER) {
                        continue;
                    }
                    if seen_region[region.bits() as usize] {
                        continue;
                    }
                    seen_region[region.bits() as usize] = true;
                    // Flood through same-region connections.
                    let mut stack = vec![(x as i32, z as i32, i)];
                    reached[i] = true;
                    while let Some((cx, cz, ci)) = stack.pop() {
                        for dir in 0..4 {
                            let Some(con) = compact.spans[ci].con(dir) else {
                                continue;
                            };
                            let (ax, az, a_i) = compact.con_indices(cx, cz, dir, con);
                            if !reached[a_i] && compact.spans[a_i].region == region {
                                reached[a_i] = true;
                                stack.push((ax, az, a_i));
                            }
                        }
                    }
                }
            }
        }
        for (i, span) in compact.spans.iter().enumerate() {
            if span.region != RegionId::NONE && !span.region.contains(RegionId::BORDER) {
                assert!(reached[i], "span {i} disconnected from its region");
            }
        }
    }
}
