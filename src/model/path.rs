//! Piecewise-linear timeline mapping
//!
//! A `PathModel` is a sparse ordered set of (frame, mapframe) pairs, both
//! coordinates monotonically non-decreasing. It is the derived form the
//! alignment machinery actually interpolates over.

use crate::model::{Model, ModelBase, ModelEvent, NotifyMode};
use crate::time::Frame;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Mutex;

/// One mapping pair: `frame` on the source timeline, `mapframe` on the
/// target timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PathPoint {
    pub frame: Frame,
    pub mapframe: Frame,
}

impl PathPoint {
    pub fn new(frame: Frame, mapframe: Frame) -> Self {
        PathPoint { frame, mapframe }
    }
}

pub struct PathModel {
    base: ModelBase,
    resolution: Frame,
    points: Mutex<BTreeSet<PathPoint>>,
}

impl PathModel {
    pub fn new(sample_rate: f64, resolution: Frame) -> Self {
        PathModel {
            base: ModelBase::new(sample_rate, NotifyMode::OnAdd),
            resolution: resolution.max(1),
            points: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn resolution(&self) -> Frame {
        self.resolution
    }

    pub fn add_point(&self, point: PathPoint) {
        {
            let mut points = self.points.lock().unwrap();
            points.insert(point);
        }
        self.base.notifier().update(point.frame, point.frame + self.resolution);
    }

    pub fn clear(&self) {
        {
            let mut points = self.points.lock().unwrap();
            points.clear();
        }
        self.base.notifier().emit(&ModelEvent::Changed);
    }

    pub fn point_count(&self) -> usize {
        self.points.lock().unwrap().len()
    }

    /// Snapshot of the points in order.
    pub fn points(&self) -> Vec<PathPoint> {
        self.points.lock().unwrap().iter().copied().collect()
    }
}

impl Model for PathModel {
    fn base(&self) -> &ModelBase {
        &self.base
    }

    fn start_frame(&self) -> Frame {
        self.points
            .lock()
            .unwrap()
            .iter()
            .next()
            .map(|p| p.frame)
            .unwrap_or(0)
    }

    fn end_frame(&self) -> Frame {
        self.points
            .lock()
            .unwrap()
            .iter()
            .next_back()
            .map(|p| p.frame)
            .unwrap_or(0)
    }

    fn completion(&self) -> i32 {
        100
    }

    fn type_name(&self) -> &'static str {
        "Path"
    }

    fn is_sparse(&self) -> bool {
        true
    }

    fn to_xml(&self, out: &mut String, indent: &str, extra_attributes: &str) {
        let mut attrs = self.base.xml_attributes();
        let _ = write!(attrs, " subtype=\"path\"");
        if !extra_attributes.is_empty() {
            let _ = write!(attrs, " {}", extra_attributes);
        }
        let _ = writeln!(out, "{}<dataset {}>", indent, attrs);
        for p in self.points() {
            let _ = writeln!(
                out,
                "{}  <point frame=\"{}\" mapframe=\"{}\"/>",
                indent, p.frame, p.mapframe
            );
        }
        let _ = writeln!(out, "{}</dataset>", indent);
    }
}
