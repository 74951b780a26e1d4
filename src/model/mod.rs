//! Timeline model hierarchy
//!
//! Every model represents some data on a time scale based on an audio frame
//! rate: sparse annotation models backed by an event series, the dense PCM
//! model produced by the coded audio reader, the column-indexed feature
//! grid, and the alignment machinery mapping frames between timelines.
//!
//! Models are shared between producer and observer threads behind `Arc`;
//! all mutation goes through interior locks, and every model carries a
//! process-unique id from a global allocator.

mod alignment;
mod dense;
mod fft;
mod grid;
mod notifier;
mod path;
mod sparse;

pub use alignment::AlignmentModel;
pub use dense::{padded_data, DenseTimeValueModel, WaveModel};
pub use fft::FftModel;
pub use grid::EditableDenseThreeDimensionalModel;
pub use notifier::{ModelEvent, NotifyMode, Notifier, ObserverId};
pub use path::{PathModel, PathPoint};
pub use sparse::{
    NoteData, NoteModel, RegionModel, SparseModel, SparseModelCore,
    SparseOneDimensionalModel, SparseTimeValueModel,
};

use crate::time::Frame;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Unique identifier for a model within this process.
pub type ModelId = u64;

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

fn next_model_id() -> ModelId {
    NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed)
}

/// State and wiring common to every model: identity, sample rate, RDF type
/// URI, source-model link, alignment, abandonment, and the notifier.
pub struct ModelBase {
    id: ModelId,
    sample_rate: f64,
    notifier: Notifier,
    type_uri: Mutex<String>,
    source_model: Mutex<Option<ModelId>>,
    alignment: Mutex<Option<Arc<AlignmentModel>>>,
    abandoning: AtomicBool,
}

impl ModelBase {
    pub fn new(sample_rate: f64, mode: NotifyMode) -> Self {
        let id = next_model_id();
        ModelBase {
            id,
            sample_rate,
            notifier: Notifier::new(id, mode),
            type_uri: Mutex::new(String::new()),
            source_model: Mutex::new(None),
            alignment: Mutex::new(None),
            abandoning: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn abandon(&self) {
        self.abandoning.store(true, Ordering::SeqCst);
    }

    pub fn is_abandoning(&self) -> bool {
        self.abandoning.load(Ordering::SeqCst)
    }

    /// Event, feature or signal type URI per the Audio Features ontology.
    pub fn rdf_type_uri(&self) -> String {
        self.type_uri.lock().unwrap().clone()
    }

    pub fn set_rdf_type_uri(&self, uri: impl Into<String>) {
        *self.type_uri.lock().unwrap() = uri.into();
    }

    pub fn source_model(&self) -> Option<ModelId> {
        *self.source_model.lock().unwrap()
    }

    pub fn set_source_model(&self, id: Option<ModelId>) {
        *self.source_model.lock().unwrap() = id;
    }

    pub fn alignment(&self) -> Option<Arc<AlignmentModel>> {
        self.alignment.lock().unwrap().clone()
    }

    pub fn set_alignment(&self, alignment: Arc<AlignmentModel>) {
        *self.alignment.lock().unwrap() = Some(alignment);
    }

    /// Announce imminent deletion to observers. Whoever owns the model is
    /// expected to call this before dropping it.
    pub fn about_to_delete(&self) {
        self.notifier.emit(&ModelEvent::AboutToBeDeleted);
    }

    /// The attribute block every model contributes to its XML element.
    pub fn xml_attributes(&self) -> String {
        let mut attrs = format!("id=\"{}\" sampleRate=\"{}\"", self.id, self.sample_rate);
        let uri = self.type_uri.lock().unwrap();
        if !uri.is_empty() {
            let _ = write!(attrs, " typeUri=\"{}\"", uri);
        }
        attrs
    }
}

/// Completion percentage with the end-of-computation protocol.
///
/// When completion reaches 100 the model switches its notifier from
/// defer-on-add to notify-on-add, emits a final change signal, and emits
/// ready exactly once. Completion never decreases.
pub struct CompletionState {
    completion: Mutex<i32>,
    ready_emitted: AtomicBool,
}

impl CompletionState {
    pub fn new(initial: i32) -> Self {
        CompletionState {
            completion: Mutex::new(initial),
            ready_emitted: AtomicBool::new(false),
        }
    }

    pub fn get(&self) -> i32 {
        *self.completion.lock().unwrap()
    }

    pub fn set(&self, completion: i32, update: bool, notifier: &Notifier) {
        {
            let mut current = self.completion.lock().unwrap();
            if *current == completion {
                return;
            }
            if completion < *current {
                debug!(
                    model_id = notifier.model_id(),
                    from = *current,
                    to = completion,
                    "ignoring completion decrease"
                );
                return;
            }
            *current = completion;
        }

        if update {
            notifier.make_deferred_notifications();
        }

        notifier.emit(&ModelEvent::CompletionChanged);

        if completion == 100 {
            // henceforth:
            notifier.switch_mode(NotifyMode::OnAdd);
            notifier.emit(&ModelEvent::Changed);
            if !self.ready_emitted.swap(true, Ordering::SeqCst) {
                notifier.emit(&ModelEvent::Ready);
            }
        }
    }
}

/// Common interface over every timeline model.
pub trait Model: Send + Sync {
    fn base(&self) -> &ModelBase;

    /// True if the model was constructed successfully. Anything holding a
    /// model should test this before use.
    fn is_ok(&self) -> bool {
        true
    }

    /// First audio frame spanned by the model.
    fn start_frame(&self) -> Frame;

    /// Frame one beyond the model's extent.
    fn end_frame(&self) -> Frame;

    /// Progress of any background computation, in [0, 100].
    fn completion(&self) -> i32;

    /// Display name of the model subtype.
    fn type_name(&self) -> &'static str;

    fn is_sparse(&self) -> bool {
        false
    }

    /// Emit the model as a `<dataset>`-style element for the external
    /// serialiser.
    fn to_xml(&self, out: &mut String, indent: &str, extra_attributes: &str);

    fn id(&self) -> ModelId {
        self.base().id()
    }

    fn sample_rate(&self) -> f64 {
        self.base().sample_rate()
    }

    fn notifier(&self) -> &Notifier {
        self.base().notifier()
    }

    fn abandon(&self) {
        self.base().abandon()
    }

    fn is_abandoning(&self) -> bool {
        self.base().is_abandoning()
    }

    /// True once all background loading or calculation has finished.
    fn is_ready(&self) -> bool {
        self.is_ok() && self.completion() == 100
    }

    /// Map a frame in this model's timeline to the reference timeline of
    /// its alignment, if it has one.
    fn align_to_reference(&self, frame: Frame) -> Frame {
        match self.base().alignment() {
            Some(a) => a.to_reference(frame),
            None => frame,
        }
    }

    /// Map a frame on the alignment's reference timeline into this model's.
    fn align_from_reference(&self, frame: Frame) -> Frame {
        match self.base().alignment() {
            Some(a) => a.from_reference(frame),
            None => frame,
        }
    }

    /// Completion of the alignment computation: 100 when there is no
    /// alignment or it has finished.
    fn alignment_completion(&self) -> i32 {
        match self.base().alignment() {
            Some(a) => a.completion(),
            None => 100,
        }
    }
}
