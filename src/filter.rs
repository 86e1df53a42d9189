//! Filters that prune solid spans an agent of the configured height, climb,
//! and radius cannot actually stand on.

use crate::{
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    span::AreaType,
};

const MAX_HEIGHT: i32 = u16::MAX as i32;

impl Heightfield {
    /// Marks non-walkable spans as walkable if their maximum is within
    /// `walkable_climb` of a walkable span below them.
    ///
    /// Allows the formation of walkable regions that will flow over low lying
    /// objects such as curbs, and up structures such as stairways.
    ///
    /// Two neighboring spans are walkable if
    /// `(current.max - neighbor.max).abs() <= walkable_climb`.
    ///
    /// Will override the effect of [`Heightfield::filter_ledge_spans`], so if
    /// both filters are used, call that one after this one.
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut previous_max = None;
                let mut previous_walkable = false;
                let mut previous_area = AreaType::NOT_WALKABLE;

                let mut key_iter = self.span_key_at(x, z);
                while let Some(key) = key_iter {
                    let span = self.span(key);
                    key_iter = span.next();
                    let walkable = span.area().is_walkable();
                    let max = span.max();

                    // If the current span is not walkable, but there is a
                    // walkable span just below it and the height difference is
                    // small enough for the agent to climb, the current span
                    // adopts the walkable area.
                    if !walkable
                        && previous_walkable
                        && let Some(previous_max) = previous_max
                        && (max as i32 - previous_max as i32).abs() <= walkable_climb as i32
                    {
                        self.span_mut(key).set_area(previous_area);
                    }

                    // Track the original walkable value so that walkability
                    // cannot propagate past multiple non-walkable spans.
                    previous_walkable = walkable;
                    previous_area = self.span(key).area();
                    previous_max = Some(max);
                }
            }
        }
    }

    /// Marks walkable spans on ledges as not walkable.
    ///
    /// A ledge is a span with one or more neighbors whose maximum is further
    /// away than `walkable_climb` from the current span's maximum. This
    /// removes the overestimation of the conservative voxelization so the
    /// resulting mesh will not have regions hanging in the air over ledges.
    pub fn filter_ledge_spans(&mut self, walkable_height: u16, walkable_climb: u16) {
        let walkable_height = walkable_height as i32;
        let walkable_climb = walkable_climb as i32;

        for z in 0..self.height {
            for x in 0..self.width {
                let mut key_iter = self.span_key_at(x, z);
                while let Some(key) = key_iter {
                    let span = self.span(key).clone();
                    key_iter = span.next();
                    // Skip non-walkable spans.
                    if !span.area().is_walkable() {
                        continue;
                    }

                    let bot = span.max() as i32;
                    let top = span
                        .next()
                        .map(|key| self.span(key).min() as i32)
                        .unwrap_or(MAX_HEIGHT);

                    // The minimum drop to any reachable neighbor floor.
                    let mut min_drop = MAX_HEIGHT;
                    // Min and max floor height of accessible neighbors.
                    let mut accessible_min = span.max() as i32;
                    let mut accessible_max = span.max() as i32;

                    for dir in 0..4 {
                        let dx = x as i32 + dir_offset_x(dir) as i32;
                        let dz = z as i32 + dir_offset_z(dir) as i32;
                        // Out-of-bounds neighbors count as a bottomless drop.
                        if !self.contains(dx, dz) {
                            min_drop = min_drop.min(-walkable_climb - bot);
                            continue;
                        }

                        // The open space from minus infinity to the first span.
                        let mut neighbor_key_iter = self.span_key_at(dx as u16, dz as u16);
                        let mut neighbor_bot = -walkable_climb;
                        let mut neighbor_top = neighbor_key_iter
                            .map(|key| self.span(key).min() as i32)
                            .unwrap_or(MAX_HEIGHT);
                        // Only consider the gap if the agent fits into it.
                        if top.min(neighbor_top) - bot.max(neighbor_bot) > walkable_height {
                            min_drop = min_drop.min(neighbor_bot - bot);
                        }

                        // The open spaces above the rest of the spans.
                        while let Some(neighbor_key) = neighbor_key_iter {
                            let neighbor_span = self.span(neighbor_key);
                            neighbor_key_iter = neighbor_span.next();
                            neighbor_bot = neighbor_span.max() as i32;
                            neighbor_top = neighbor_span
                                .next()
                                .map(|key| self.span(key).min() as i32)
                                .unwrap_or(MAX_HEIGHT);
                            if top.min(neighbor_top) - bot.max(neighbor_bot) <= walkable_height {
                                continue;
                            }
                            min_drop = min_drop.min(neighbor_bot - bot);

                            if (neighbor_bot - bot).abs() <= walkable_climb {
                                accessible_min = accessible_min.min(neighbor_bot);
                                accessible_max = accessible_max.max(neighbor_bot);
                            }
                        }
                    }

                    // The span is a ledge if the drop to any neighbor exceeds
                    // the climb, or if the spread across the accessible
                    // neighbors marks a steep slope.
                    if min_drop < -walkable_climb
                        || accessible_max - accessible_min > walkable_climb
                    {
                        self.span_mut(key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }

    /// Marks walkable spans as not walkable if the clearance above them is
    /// too small for the agent to stand there.
    ///
    /// The clearance is the distance from the span's maximum to the next
    /// higher span's minimum in the same column.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut key_iter = self.span_key_at(x, z);
                while let Some(key) = key_iter {
                    let span = self.span(key);
                    key_iter = span.next();
                    let bot = span.max() as i32;
                    let top = span
                        .next()
                        .map(|key| self.span(key).min() as i32)
                        .unwrap_or(MAX_HEIGHT);
                    if top - bot < walkable_height as i32 {
                        self.span_mut(key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        heightfield::{HeightfieldBuilder, SpanInsertion},
        math::Aabb3d,
        span::{AreaType, SpanBuilder},
    };

    use super::*;

    fn height_field() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::ZERO,
                max: Vec3A::new(5.0, 10.0, 5.0),
            },
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn insert(heightfield: &mut Heightfield, x: u16, z: u16, min: u16, max: u16, area: AreaType) {
        heightfield
            .add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: 0,
                span: SpanBuilder {
                    min,
                    max,
                    area,
                    next: None,
                }
                .build(),
            })
            .unwrap();
    }

    fn fill_floor(heightfield: &mut Heightfield, max: u16, area: AreaType) {
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                insert(heightfield, x, z, 0, max, area);
            }
        }
    }

    #[test]
    fn low_hanging_obstacle_is_promoted() {
        let mut heightfield = height_field();
        insert(&mut heightfield, 2, 2, 0, 2, AreaType::DEFAULT_WALKABLE);
        // A curb one cell above the walkable floor.
        insert(&mut heightfield, 2, 2, 2, 3, AreaType::NOT_WALKABLE);

        heightfield.filter_low_hanging_walkable_obstacles(1);

        let spans: Vec<AreaType> = heightfield.column(2, 2).map(|(_, s)| s.area()).collect();
        assert_eq!(
            spans,
            vec![AreaType::DEFAULT_WALKABLE, AreaType::DEFAULT_WALKABLE]
        );
    }

    #[test]
    fn tall_obstacle_is_not_promoted() {
        let mut heightfield = height_field();
        insert(&mut heightfield, 2, 2, 0, 2, AreaType::DEFAULT_WALKABLE);
        insert(&mut heightfield, 2, 2, 4, 8, AreaType::NOT_WALKABLE);

        heightfield.filter_low_hanging_walkable_obstacles(1);

        let spans: Vec<AreaType> = heightfield.column(2, 2).map(|(_, s)| s.area()).collect();
        assert_eq!(spans, vec![AreaType::DEFAULT_WALKABLE, AreaType::NOT_WALKABLE]);
    }

    #[test]
    fn walkability_does_not_propagate_through_stacked_obstacles() {
        let mut heightfield = height_field();
        insert(&mut heightfield, 1, 1, 0, 2, AreaType::DEFAULT_WALKABLE);
        insert(&mut heightfield, 1, 1, 2, 3, AreaType::NOT_WALKABLE);
        insert(&mut heightfield, 1, 1, 3, 4, AreaType::NOT_WALKABLE);

        heightfield.filter_low_hanging_walkable_obstacles(1);

        let spans: Vec<AreaType> = heightfield.column(1, 1).map(|(_, s)| s.area()).collect();
        // Only the first obstacle is adopted; the second stays blocked.
        assert_eq!(
            spans,
            vec![
                AreaType::DEFAULT_WALKABLE,
                AreaType::DEFAULT_WALKABLE,
                AreaType::NOT_WALKABLE
            ]
        );
    }

    #[test]
    fn ledge_spans_are_rejected() {
        let mut heightfield = height_field();
        fill_floor(&mut heightfield, 1, AreaType::DEFAULT_WALKABLE);
        // A single elevated platform towering over the floor.
        insert(&mut heightfield, 2, 2, 1, 6, AreaType::DEFAULT_WALKABLE);

        heightfield.filter_ledge_spans(2, 1);

        let platform = heightfield.column(2, 2).last().unwrap().1;
        assert_eq!(platform.area(), AreaType::NOT_WALKABLE);
        // The flat floor well inside the grid survives, e.g. right next to
        // the platform.
        let floor = heightfield.span_at(2, 3).unwrap();
        assert_eq!(floor.area(), AreaType::DEFAULT_WALKABLE);
    }

    #[test]
    fn interior_floor_survives_ledge_filter_with_climbable_border() {
        let mut heightfield = height_field();
        fill_floor(&mut heightfield, 1, AreaType::DEFAULT_WALKABLE);

        // Grid edges drop out of bounds, which reads as a bottomless ledge.
        heightfield.filter_ledge_spans(2, 1);

        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let expected = if x == 0
                    || z == 0
                    || x == heightfield.width - 1
                    || z == heightfield.height - 1
                {
                    AreaType::NOT_WALKABLE
                } else {
                    AreaType::DEFAULT_WALKABLE
                };
                assert_eq!(heightfield.span_at(x, z).unwrap().area(), expected);
            }
        }
    }

    #[test]
    fn low_clearance_spans_are_rejected() {
        let mut heightfield = height_field();
        insert(&mut heightfield, 1, 1, 0, 1, AreaType::DEFAULT_WALKABLE);
        // Ceiling two cells above the floor.
        insert(&mut heightfield, 1, 1, 3, 9, AreaType::NOT_WALKABLE);

        heightfield.filter_walkable_low_height_spans(3);

        let floor = heightfield.span_at(1, 1).unwrap();
        assert_eq!(floor.area(), AreaType::NOT_WALKABLE);
    }

    #[test]
    fn exact_clearance_is_enough() {
        let mut heightfield = height_field();
        insert(&mut heightfield, 1, 1, 0, 1, AreaType::DEFAULT_WALKABLE);
        insert(&mut heightfield, 1, 1, 3, 9, AreaType::NOT_WALKABLE);

        heightfield.filter_walkable_low_height_spans(2);

        let floor = heightfield.span_at(1, 1).unwrap();
        assert_eq!(floor.area(), AreaType::DEFAULT_WALKABLE);
    }

    #[test]
    fn open_sky_spans_keep_their_area() {
        let mut heightfield = height_field();
        insert(&mut heightfield, 1, 1, 0, 1, AreaType::DEFAULT_WALKABLE);

        heightfield.filter_walkable_low_height_spans(2);

        let floor = heightfield.span_at(1, 1).unwrap();
        assert_eq!(floor.area(), AreaType::DEFAULT_WALKABLE);
    }

    #[test]
    fn filters_are_idempotent() {
        let mut heightfield = height_field();
        fill_floor(&mut heightfield, 1, AreaType::DEFAULT_WALKABLE);
        insert(&mut heightfield, 2, 2, 1, 6, AreaType::DEFAULT_WALKABLE);
        insert(&mut heightfield, 3, 3, 3, 9, AreaType::NOT_WALKABLE);

        let run = |heightfield: &mut Heightfield| {
            heightfield.filter_low_hanging_walkable_obstacles(1);
            heightfield.filter_ledge_spans(2, 1);
            heightfield.filter_walkable_low_height_spans(2);
        };

        run(&mut heightfield);
        let once: Vec<_> = (0..heightfield.height)
            .flat_map(|z| (0..heightfield.width).map(move |x| (x, z)))
            .flat_map(|(x, z)| {
                heightfield
                    .column(x, z)
                    .map(|(_, s)| s.clone())
                    .collect::<Vec<_>>()
            })
            .collect();

        run(&mut heightfield);
        let twice: Vec<_> = (0..heightfield.height)
            .flat_map(|z| (0..heightfield.width).map(move |x| (x, z)))
            .flat_map(|(x, z)| {
                heightfield
                    .column(x, z)
                    .map(|(_, s)| s.clone())
                    .collect::<Vec<_>>()
            })
            .collect();

        assert_eq!(once, twice);
    }
}
