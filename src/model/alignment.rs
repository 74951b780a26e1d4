//! Frame mapping between a reference and an aligned timeline
//!
//! The raw material is a sparse time-value series of (frame on the aligned
//! model, seconds on the reference model) pairs, typically produced by an
//! alignment transform. Two piecewise-linear paths are derived from it —
//! forward and reverse — and rebuilt on every change notification until the
//! raw model completes, at which point it is released and the paths are
//! final.

use crate::model::path::{PathModel, PathPoint};
use crate::model::{Model, ModelBase, ModelEvent, NotifyMode, SparseModel, SparseTimeValueModel};
use crate::time::Frame;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub struct AlignmentModel {
    base: ModelBase,
    reference: Arc<dyn Model>,
    aligned: Arc<dyn Model>,
    raw_path: Mutex<Option<Arc<SparseTimeValueModel>>>,
    path: Mutex<Option<Arc<PathModel>>>,
    reverse_path: Mutex<Option<Arc<PathModel>>>,
    path_begun: AtomicBool,
    path_complete: AtomicBool,
}

impl AlignmentModel {
    /// The reference and aligned models are borrowed for the alignment's
    /// lifetime; a single owning container is expected to drop them
    /// together.
    pub fn new(
        reference: Arc<dyn Model>,
        aligned: Arc<dyn Model>,
        raw_path: Option<Arc<SparseTimeValueModel>>,
    ) -> Arc<Self> {
        let model = Arc::new(AlignmentModel {
            base: ModelBase::new(reference.sample_rate(), NotifyMode::OnAdd),
            reference,
            aligned,
            raw_path: Mutex::new(raw_path.clone()),
            path: Mutex::new(None),
            reverse_path: Mutex::new(None),
            path_begun: AtomicBool::new(false),
            path_complete: AtomicBool::new(false),
        });

        if let Some(raw) = raw_path {
            let weak = Arc::downgrade(&model);
            raw.notifier().subscribe(move |_, event| {
                let Some(model) = weak.upgrade() else {
                    return;
                };
                match event {
                    ModelEvent::CompletionChanged | ModelEvent::Ready => {
                        model.path_completion_changed();
                    }
                    ModelEvent::Changed | ModelEvent::ChangedWithin { .. } => {
                        model.path_changed();
                    }
                    ModelEvent::AboutToBeDeleted => {}
                }
            });
            model.construct_paths();
        }

        model
    }

    pub fn reference_model(&self) -> &Arc<dyn Model> {
        &self.reference
    }

    pub fn aligned_model(&self) -> &Arc<dyn Model> {
        &self.aligned
    }

    /// Map a frame on the aligned model's timeline to the reference.
    pub fn to_reference(&self, frame: Frame) -> Frame {
        self.ensure_paths();
        let path = self.path.lock().unwrap().clone();
        match path {
            Some(path) => align(&path.points(), frame),
            None => frame,
        }
    }

    /// Map a frame on the reference timeline to the aligned model's.
    pub fn from_reference(&self, frame: Frame) -> Frame {
        self.ensure_paths();
        let reverse = self.reverse_path.lock().unwrap().clone();
        match reverse {
            Some(reverse) => align(&reverse.points(), frame),
            None => frame,
        }
    }

    /// The derived forward path, once constructed.
    pub fn path(&self) -> Option<Arc<PathModel>> {
        self.path.lock().unwrap().clone()
    }

    /// The derived reverse path, once constructed.
    pub fn reverse_path(&self) -> Option<Arc<PathModel>> {
        self.reverse_path.lock().unwrap().clone()
    }

    fn path_changed(&self) {
        if self.path_complete.load(Ordering::SeqCst) {
            let mut raw = self.raw_path.lock().unwrap();
            if raw.is_some() {
                debug!("alignment: releasing raw path model");
                *raw = None;
            }
        } else {
            self.construct_paths();
        }
    }

    fn path_completion_changed(&self) {
        let completion = {
            let raw = self.raw_path.lock().unwrap();
            let Some(raw) = raw.as_ref() else {
                return;
            };
            raw.completion()
        };
        self.path_begun.store(true, Ordering::SeqCst);

        if !self.path_complete.load(Ordering::SeqCst) && completion == 100 {
            self.path_complete.store(true, Ordering::SeqCst);
            self.construct_paths();
            debug!("alignment: path complete, releasing raw path model");
            *self.raw_path.lock().unwrap() = None;
        }

        self.base.notifier().emit(&ModelEvent::CompletionChanged);
        if self.path_complete.load(Ordering::SeqCst) {
            self.base.notifier().emit(&ModelEvent::Ready);
        }
    }

    fn ensure_paths(&self) {
        let have = self.path.lock().unwrap().is_some();
        if !have {
            self.construct_paths();
        }
    }

    /// Derive forward and reverse paths from the raw (frame, seconds)
    /// series, converting seconds to frames at the reference rate.
    fn construct_paths(&self) {
        let raw = self.raw_path.lock().unwrap().clone();
        let Some(raw) = raw else {
            return;
        };

        let reference_rate = self.reference.sample_rate();
        let forward = PathModel::new(raw.sample_rate(), SparseModel::resolution(raw.as_ref()));
        let reverse = PathModel::new(raw.sample_rate(), SparseModel::resolution(raw.as_ref()));
        for e in raw.all_events() {
            let frame = e.frame();
            let mapped = (e.value() as f64 * reference_rate).round() as Frame;
            forward.add_point(PathPoint::new(frame, mapped));
            reverse.add_point(PathPoint::new(mapped, frame));
        }

        *self.path.lock().unwrap() = Some(Arc::new(forward));
        *self.reverse_path.lock().unwrap() = Some(Arc::new(reverse));
    }
}

impl Model for AlignmentModel {
    fn base(&self) -> &ModelBase {
        &self.base
    }

    fn is_ok(&self) -> bool {
        match self.raw_path.lock().unwrap().as_ref() {
            Some(raw) => raw.is_ok(),
            None => true,
        }
    }

    fn start_frame(&self) -> Frame {
        self.reference.start_frame().min(self.aligned.start_frame())
    }

    fn end_frame(&self) -> Frame {
        self.reference.end_frame().max(self.aligned.end_frame())
    }

    fn completion(&self) -> i32 {
        if self.path_complete.load(Ordering::SeqCst) {
            return 100;
        }
        let raw = self.raw_path.lock().unwrap().clone();
        match raw {
            None => 100,
            Some(raw) => {
                let completion = raw.completion();
                if completion == 100 {
                    100
                } else if !self.path_begun.load(Ordering::SeqCst) {
                    0
                } else {
                    completion
                }
            }
        }
    }

    fn type_name(&self) -> &'static str {
        "Alignment"
    }

    fn to_xml(&self, out: &mut String, indent: &str, extra_attributes: &str) {
        let mut attrs = self.base.xml_attributes();
        let _ = write!(
            attrs,
            " subtype=\"alignment\" reference=\"{}\" aligned=\"{}\"",
            self.reference.id(),
            self.aligned.id()
        );
        if !extra_attributes.is_empty() {
            let _ = write!(attrs, " {}", extra_attributes);
        }
        let _ = writeln!(out, "{}<dataset {}/>", indent, attrs);
    }
}

/// Project a frame through a monotone path, interpolating linearly between
/// the nearest points. Identity off an empty path; negative destinations
/// clamp to zero.
fn align(points: &[PathPoint], frame: Frame) -> Frame {
    if points.is_empty() {
        return frame;
    }

    // greatest point whose source frame <= frame, or the first point
    let mut i = points.partition_point(|p| p.frame <= frame);
    if i > 0 {
        i -= 1;
    }

    let found = points[i];
    let following = if i + 1 < points.len() {
        points[i + 1]
    } else {
        found
    };

    if found.mapframe < 0 {
        return 0;
    }

    let mut result = found.mapframe;
    if following.frame != found.frame && frame > found.frame {
        let interp = (frame - found.frame) as f64 / (following.frame - found.frame) as f64;
        result += ((following.mapframe - found.mapframe) as f64 * interp).round() as Frame;
    }

    result
}
