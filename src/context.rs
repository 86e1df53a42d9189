use std::time::{Duration, Instant};

/// Severity category for build-progress messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    /// Ordinary progress reporting.
    Progress,
    /// A recoverable problem; the offending primitive was skipped.
    Warning,
    /// A stage failed.
    Error,
}

/// Labels for the per-stage build timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum TimerLabel {
    /// The whole pipeline.
    Total,
    /// Triangle rasterization into the solid heightfield.
    RasterizeTriangles,
    /// The low-hanging obstacle filter.
    FilterLowObstacles,
    /// The ledge span filter.
    FilterBorder,
    /// The low-clearance filter.
    FilterWalkable,
    /// Solid to compact heightfield conversion.
    BuildCompactHeightfield,
    /// Walkable area erosion by agent radius.
    ErodeArea,
    /// The area median filter.
    MedianArea,
    /// Box volume marking.
    MarkBoxArea,
    /// Cylinder volume marking.
    MarkCylinderArea,
    /// Convex polygon volume marking.
    MarkConvexPolyArea,
    /// Distance field construction.
    BuildDistanceField,
    /// Region partitioning.
    BuildRegions,
    /// Contour tracing and simplification.
    BuildContours,
    /// Contour polygonization.
    BuildPolyMesh,
}

impl TimerLabel {
    const COUNT: usize = 15;
}

/// The build context: categorized logging plus labeled stage timers.
///
/// Every method is a no-op when the context is disabled;
/// [`Context::accumulated_time`] then returns `None`. Log output is routed
/// through [`tracing`], so a subscriber installed by the caller decides
/// where messages end up.
#[derive(Debug)]
pub struct Context {
    log_enabled: bool,
    timers_enabled: bool,
    accumulated: [Option<Duration>; TimerLabel::COUNT],
    started: [Option<Instant>; TimerLabel::COUNT],
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates a context with logging and timers enabled.
    pub fn new() -> Self {
        Self {
            log_enabled: true,
            timers_enabled: true,
            accumulated: [None; TimerLabel::COUNT],
            started: [None; TimerLabel::COUNT],
        }
    }

    /// Creates a context whose every method is a no-op.
    pub fn disabled() -> Self {
        Self {
            log_enabled: false,
            timers_enabled: false,
            ..Self::new()
        }
    }

    /// Enables or disables log output.
    pub fn enable_log(&mut self, enabled: bool) {
        self.log_enabled = enabled;
    }

    /// Enables or disables the timers.
    pub fn enable_timers(&mut self, enabled: bool) {
        self.timers_enabled = enabled;
    }

    /// Logs a build message under the given category.
    pub fn log(&self, category: LogCategory, message: impl AsRef<str>) {
        if !self.log_enabled {
            return;
        }
        let message = message.as_ref();
        match category {
            LogCategory::Progress => tracing::debug!(target: "navgen", "{message}"),
            LogCategory::Warning => tracing::warn!(target: "navgen", "{message}"),
            LogCategory::Error => tracing::error!(target: "navgen", "{message}"),
        }
    }

    /// Starts the timer for the given label.
    pub fn start_timer(&mut self, label: TimerLabel) {
        if !self.timers_enabled {
            return;
        }
        self.started[label as usize] = Some(Instant::now());
    }

    /// Stops the timer for the given label, adding the elapsed time to its
    /// accumulated total. Stopping a timer that was never started is a no-op.
    pub fn stop_timer(&mut self, label: TimerLabel) {
        if !self.timers_enabled {
            return;
        }
        let Some(started) = self.started[label as usize].take() else {
            return;
        };
        let elapsed = started.elapsed();
        let total = self.accumulated[label as usize].get_or_insert(Duration::ZERO);
        *total += elapsed;
    }

    /// Clears all accumulated timer totals.
    pub fn reset_timers(&mut self) {
        self.accumulated = [None; TimerLabel::COUNT];
        self.started = [None; TimerLabel::COUNT];
    }

    /// The total time accumulated under the given label, or `None` if the
    /// timers are disabled or the timer never ran.
    pub fn accumulated_time(&self, label: TimerLabel) -> Option<Duration> {
        if !self.timers_enabled {
            return None;
        }
        self.accumulated[label as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timers_accumulate_across_runs() {
        let mut ctx = Context::new();
        ctx.start_timer(TimerLabel::RasterizeTriangles);
        ctx.stop_timer(TimerLabel::RasterizeTriangles);
        let first = ctx
            .accumulated_time(TimerLabel::RasterizeTriangles)
            .unwrap();
        ctx.start_timer(TimerLabel::RasterizeTriangles);
        ctx.stop_timer(TimerLabel::RasterizeTriangles);
        let second = ctx
            .accumulated_time(TimerLabel::RasterizeTriangles)
            .unwrap();
        assert!(second >= first);
    }

    #[test]
    fn disabled_context_reports_nothing() {
        let mut ctx = Context::disabled();
        ctx.start_timer(TimerLabel::Total);
        ctx.stop_timer(TimerLabel::Total);
        assert_eq!(ctx.accumulated_time(TimerLabel::Total), None);
    }

    #[test]
    fn stop_without_start_is_a_noop() {
        let mut ctx = Context::new();
        ctx.stop_timer(TimerLabel::BuildRegions);
        assert_eq!(ctx.accumulated_time(TimerLabel::BuildRegions), None);
    }

    #[test]
    fn reset_clears_totals() {
        let mut ctx = Context::new();
        ctx.start_timer(TimerLabel::Total);
        ctx.stop_timer(TimerLabel::Total);
        ctx.reset_timers();
        assert_eq!(ctx.accumulated_time(TimerLabel::Total), None);
    }
}
