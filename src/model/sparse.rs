//! Sparse annotation models backed by an event series
//!
//! Four concrete variants share one core: instants (one-dimensional),
//! time/value points, notes, and regions. The core owns the series mutex,
//! the value extents, units, and the completion state; the variants add
//! their constructors, their point helpers, and their export shapes.

use crate::base::{Direction, Event, EventSeries};
use crate::model::{CompletionState, Model, ModelBase, ModelEvent, NotifyMode};
use crate::time::{Frame, RealTime};
use std::fmt::Write as _;
use std::sync::Mutex;

struct Extents {
    minimum: f32,
    maximum: f32,
    have: bool,
}

/// Shared state of every event-bearing sparse model.
pub struct SparseModelCore {
    base: ModelBase,
    resolution: Frame,
    events: Mutex<EventSeries>,
    extents: Mutex<Extents>,
    units: Mutex<String>,
    completion: CompletionState,
}

impl SparseModelCore {
    fn new(sample_rate: f64, resolution: Frame, notify_on_add: bool) -> Self {
        let mode = if notify_on_add {
            NotifyMode::OnAdd
        } else {
            NotifyMode::Deferred
        };
        // A model built in the background starts incomplete; an editable
        // one is complete from the outset.
        let completion = if notify_on_add { 100 } else { 0 };
        SparseModelCore {
            base: ModelBase::new(sample_rate, mode),
            resolution: resolution.max(1),
            events: Mutex::new(EventSeries::new()),
            extents: Mutex::new(Extents {
                minimum: 0.0,
                maximum: 0.0,
                have: false,
            }),
            units: Mutex::new(String::new()),
            completion: CompletionState::new(completion),
        }
    }

    fn with_extents(
        sample_rate: f64,
        resolution: Frame,
        minimum: f32,
        maximum: f32,
        notify_on_add: bool,
    ) -> Self {
        let core = Self::new(sample_rate, resolution, notify_on_add);
        *core.extents.lock().unwrap() = Extents {
            minimum,
            maximum,
            have: true,
        };
        core
    }

    pub fn resolution(&self) -> Frame {
        self.resolution
    }

    pub fn add_event(&self, e: Event) {
        let widened = if e.has_value() {
            let mut extents = self.extents.lock().unwrap();
            let v = e.value();
            if !extents.have {
                extents.minimum = v;
                extents.maximum = v;
                extents.have = true;
                true
            } else if v < extents.minimum {
                extents.minimum = v;
                true
            } else if v > extents.maximum {
                extents.maximum = v;
                true
            } else {
                false
            }
        } else {
            false
        };

        {
            let mut series = self.events.lock().unwrap();
            series.add(e.clone());
        }

        // series mutex released before observers run
        if widened {
            self.base.notifier().emit(&ModelEvent::Changed);
        } else {
            let end = e.end_frame().max(e.frame() + self.resolution);
            self.base.notifier().update(e.frame(), end);
        }
    }

    pub fn remove_event(&self, e: &Event) {
        {
            let mut series = self.events.lock().unwrap();
            series.remove(e);
        }
        let end = e.end_frame().max(e.frame() + self.resolution);
        self.base.notifier().update(e.frame(), end);
    }

    pub fn set_completion(&self, completion: i32, update: bool) {
        self.completion.set(completion, update, self.base.notifier());
    }

    fn with_series<R>(&self, f: impl FnOnce(&EventSeries) -> R) -> R {
        let series = self.events.lock().unwrap();
        f(&series)
    }
}

/// Query and edit surface shared by the sparse model variants.
pub trait SparseModel: Model {
    fn core(&self) -> &SparseModelCore;

    fn add_event(&self, e: Event) {
        self.core().add_event(e);
    }

    fn remove_event(&self, e: &Event) {
        self.core().remove_event(e);
    }

    fn contains_event(&self, e: &Event) -> bool {
        self.core().with_series(|s| s.contains(e))
    }

    fn event_count(&self) -> i32 {
        self.core().with_series(|s| s.count())
    }

    fn is_empty(&self) -> bool {
        self.core().with_series(|s| s.is_empty())
    }

    fn all_events(&self) -> Vec<Event> {
        self.core().with_series(|s| s.all_events())
    }

    fn events_spanning(&self, frame: Frame, duration: Frame) -> Vec<Event> {
        self.core().with_series(|s| s.events_spanning(frame, duration))
    }

    fn events_within(&self, frame: Frame, duration: Frame, overspill: usize) -> Vec<Event> {
        self.core()
            .with_series(|s| s.events_within(frame, duration, overspill))
    }

    fn events_starting_within(&self, frame: Frame, duration: Frame) -> Vec<Event> {
        self.core()
            .with_series(|s| s.events_starting_within(frame, duration))
    }

    fn events_covering(&self, frame: Frame) -> Vec<Event> {
        self.core().with_series(|s| s.events_covering(frame))
    }

    fn event_preceding(&self, e: &Event) -> Option<Event> {
        self.core().with_series(|s| s.event_preceding(e))
    }

    fn event_following(&self, e: &Event) -> Option<Event> {
        self.core().with_series(|s| s.event_following(e))
    }

    fn nearest_event_matching(
        &self,
        start_frame: Frame,
        predicate: &dyn Fn(&Event) -> bool,
        direction: Direction,
    ) -> Option<Event> {
        self.core()
            .with_series(|s| s.nearest_event_matching(start_frame, predicate, direction))
    }

    fn event_by_index(&self, index: usize) -> Option<Event> {
        self.core().with_series(|s| s.event_by_index(index))
    }

    fn resolution(&self) -> Frame {
        self.core().resolution()
    }

    fn value_minimum(&self) -> f32 {
        self.core().extents.lock().unwrap().minimum
    }

    fn value_maximum(&self) -> f32 {
        self.core().extents.lock().unwrap().maximum
    }

    fn scale_units(&self) -> String {
        self.core().units.lock().unwrap().clone()
    }

    fn set_scale_units(&self, units: impl Into<String>)
    where
        Self: Sized,
    {
        *self.core().units.lock().unwrap() = units.into();
    }

    fn set_completion(&self, completion: i32, update: bool) {
        self.core().set_completion(completion, update);
    }
}

fn sparse_to_xml(
    core: &SparseModelCore,
    subtype: &str,
    out: &mut String,
    indent: &str,
    extra_attributes: &str,
) {
    let mut attrs = core.base.xml_attributes();
    let _ = write!(
        attrs,
        " subtype=\"{}\" resolution=\"{}\"",
        subtype, core.resolution
    );
    let units = core.units.lock().unwrap();
    if !units.is_empty() {
        let _ = write!(attrs, " units=\"{}\"", units);
    }
    drop(units);
    if !extra_attributes.is_empty() {
        let _ = write!(attrs, " {}", extra_attributes);
    }
    core.with_series(|s| s.to_xml(out, indent, &attrs));
}

macro_rules! impl_sparse_model {
    ($name:ident, $type_name:expr, $subtype:expr) => {
        impl Model for $name {
            fn base(&self) -> &ModelBase {
                &self.core.base
            }

            fn start_frame(&self) -> Frame {
                self.core.with_series(|s| s.start_frame())
            }

            fn end_frame(&self) -> Frame {
                self.core.with_series(|s| s.end_frame())
            }

            fn completion(&self) -> i32 {
                self.core.completion.get()
            }

            fn type_name(&self) -> &'static str {
                $type_name
            }

            fn is_sparse(&self) -> bool {
                true
            }

            fn to_xml(&self, out: &mut String, indent: &str, extra_attributes: &str) {
                sparse_to_xml(&self.core, $subtype, out, indent, extra_attributes);
            }
        }

        impl SparseModel for $name {
            fn core(&self) -> &SparseModelCore {
                &self.core
            }
        }
    };
}

/// Instants: durationless, valueless events with optional labels.
pub struct SparseOneDimensionalModel {
    core: SparseModelCore,
}

impl SparseOneDimensionalModel {
    pub fn new(sample_rate: f64, resolution: Frame, notify_on_add: bool) -> Self {
        SparseOneDimensionalModel {
            core: SparseModelCore::new(sample_rate, resolution, notify_on_add),
        }
    }

    pub fn add_point(&self, frame: Frame, label: &str) {
        let mut e = Event::new(frame);
        if !label.is_empty() {
            e = e.with_label(label);
        }
        self.core.add_event(e);
    }
}

impl_sparse_model!(SparseOneDimensionalModel, "Sparse One-Dimensional", "instants");

/// A wiggly-line plot: one value per point at arbitrary frames.
pub struct SparseTimeValueModel {
    core: SparseModelCore,
}

impl SparseTimeValueModel {
    pub fn new(sample_rate: f64, resolution: Frame, notify_on_add: bool) -> Self {
        SparseTimeValueModel {
            core: SparseModelCore::new(sample_rate, resolution, notify_on_add),
        }
    }

    pub fn with_extents(
        sample_rate: f64,
        resolution: Frame,
        minimum: f32,
        maximum: f32,
        notify_on_add: bool,
    ) -> Self {
        SparseTimeValueModel {
            core: SparseModelCore::with_extents(
                sample_rate,
                resolution,
                minimum,
                maximum,
                notify_on_add,
            ),
        }
    }

    pub fn add_point(&self, frame: Frame, value: f32, label: &str) {
        let mut e = Event::new(frame).with_value(value);
        if !label.is_empty() {
            e = e.with_label(label);
        }
        self.core.add_event(e);
    }
}

impl_sparse_model!(SparseTimeValueModel, "Sparse Time-Value", "timevalue");

/// One note produced by [`NoteModel::notes`].
#[derive(Debug, Clone, PartialEq)]
pub struct NoteData {
    pub start_frame: Frame,
    pub duration: Frame,
    pub midi_pitch: i32,
    /// Present when the model's scale units were Hz.
    pub frequency: Option<f32>,
    pub velocity: u8,
    pub label: String,
}

/// Notes: durationful events whose value is a pitch and whose level is a
/// normalised velocity.
pub struct NoteModel {
    core: SparseModelCore,
    value_quantization: Mutex<f32>,
}

impl NoteModel {
    pub fn new(sample_rate: f64, resolution: Frame, notify_on_add: bool) -> Self {
        NoteModel {
            core: SparseModelCore::new(sample_rate, resolution, notify_on_add),
            value_quantization: Mutex::new(0.0),
        }
    }

    pub fn with_extents(
        sample_rate: f64,
        resolution: Frame,
        minimum: f32,
        maximum: f32,
        notify_on_add: bool,
    ) -> Self {
        NoteModel {
            core: SparseModelCore::with_extents(
                sample_rate,
                resolution,
                minimum,
                maximum,
                notify_on_add,
            ),
            value_quantization: Mutex::new(0.0),
        }
    }

    pub fn add_note(&self, frame: Frame, value: f32, duration: Frame, level: f32, label: &str) {
        let mut e = Event::new(frame)
            .with_value(value)
            .with_duration(duration)
            .with_level(level);
        if !label.is_empty() {
            e = e.with_label(label);
        }
        self.core.add_event(e);
    }

    pub fn value_quantization(&self) -> f32 {
        *self.value_quantization.lock().unwrap()
    }

    pub fn set_value_quantization(&self, q: f32) {
        *self.value_quantization.lock().unwrap() = q;
    }

    /// Export the events as note data, converting values from Hz to MIDI
    /// pitch when the scale units say so.
    pub fn notes(&self) -> Vec<NoteData> {
        let hz = self.scale_units() == "Hz";
        self.all_events()
            .into_iter()
            .map(|e| {
                let (midi_pitch, frequency) = if hz {
                    (frequency_to_midi(e.value()), Some(e.value()))
                } else {
                    (e.value().round() as i32, None)
                };
                let velocity = if e.has_level() && e.level() > 0.0 {
                    (e.level() * 127.0).round().clamp(1.0, 127.0) as u8
                } else {
                    100
                };
                NoteData {
                    start_frame: e.frame(),
                    duration: e.duration(),
                    midi_pitch,
                    frequency,
                    velocity,
                    label: e.label().to_string(),
                }
            })
            .collect()
    }

    /// Tabular accessors: one row per event.
    pub fn row_count(&self) -> usize {
        self.event_count() as usize
    }

    pub fn column_count(&self) -> usize {
        6
    }

    pub fn heading(&self, column: usize) -> &'static str {
        match column {
            0 => "Time",
            1 => "Frame",
            2 => "Pitch",
            3 => "Duration",
            4 => "Level",
            5 => "Label",
            _ => "Unknown",
        }
    }

    pub fn cell(&self, row: usize, column: usize) -> String {
        let Some(e) = self.event_by_index(row) else {
            return String::new();
        };
        match column {
            0 => RealTime::from_frame(e.frame(), self.sample_rate()).to_string(),
            1 => e.frame().to_string(),
            2 => e.value().to_string(),
            3 => e.duration().to_string(),
            4 => e.level().to_string(),
            5 => e.label().to_string(),
            _ => String::new(),
        }
    }
}

impl_sparse_model!(NoteModel, "Note", "note");

/// Regions: durationful events with a plain (non-pitch) value.
pub struct RegionModel {
    core: SparseModelCore,
}

impl RegionModel {
    pub fn new(sample_rate: f64, resolution: Frame, notify_on_add: bool) -> Self {
        RegionModel {
            core: SparseModelCore::new(sample_rate, resolution, notify_on_add),
        }
    }

    pub fn with_extents(
        sample_rate: f64,
        resolution: Frame,
        minimum: f32,
        maximum: f32,
        notify_on_add: bool,
    ) -> Self {
        RegionModel {
            core: SparseModelCore::with_extents(
                sample_rate,
                resolution,
                minimum,
                maximum,
                notify_on_add,
            ),
        }
    }

    pub fn add_region(&self, frame: Frame, value: f32, duration: Frame, label: &str) {
        let mut e = Event::new(frame).with_value(value).with_duration(duration);
        if !label.is_empty() {
            e = e.with_label(label);
        }
        self.core.add_event(e);
    }
}

impl_sparse_model!(RegionModel, "Region", "region");

/// MIDI pitch for a frequency, A440 = 69.
fn frequency_to_midi(frequency: f32) -> i32 {
    if frequency <= 0.0 {
        return 0;
    }
    (69.0 + 12.0 * (frequency / 440.0).log2()).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Notifier;
    use std::sync::{Arc, Mutex as StdMutex};

    fn watch(notifier: &Notifier) -> Arc<StdMutex<Vec<ModelEvent>>> {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let log2 = log.clone();
        notifier.subscribe(move |_, ev| log2.lock().unwrap().push(ev.clone()));
        log
    }

    #[test]
    fn test_extent_widening_triggers_full_change() {
        let m = SparseTimeValueModel::new(44100.0, 1, true);
        let log = watch(m.notifier());

        m.add_point(0, 1.0, ""); // first value establishes extents
        m.add_point(10, 3.0, ""); // widens upwards
        m.add_point(20, 2.0, ""); // inside the range
        m.add_point(30, 0.5, ""); // widens downwards

        let events = log.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                ModelEvent::Changed,
                ModelEvent::Changed,
                ModelEvent::ChangedWithin { start: 20, end: 21 },
                ModelEvent::Changed,
            ]
        );
        assert_eq!(m.value_minimum(), 0.5);
        assert_eq!(m.value_maximum(), 3.0);
    }

    #[test]
    fn test_deferred_model_flushes_on_completion() {
        let m = SparseOneDimensionalModel::new(44100.0, 1, false);
        let log = watch(m.notifier());

        m.add_point(100, "a");
        m.add_point(200, "b");
        assert!(log.lock().unwrap().is_empty());

        m.set_completion(100, true);
        let events = log.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                ModelEvent::ChangedWithin { start: 100, end: 201 },
                ModelEvent::CompletionChanged,
                ModelEvent::Changed,
                ModelEvent::Ready,
            ]
        );

        // post-completion edits are announced directly
        m.add_point(300, "c");
        assert_eq!(
            log.lock().unwrap().last().unwrap(),
            &ModelEvent::ChangedWithin { start: 300, end: 301 }
        );
    }

    #[test]
    fn test_note_export_midi_units() {
        let m = NoteModel::new(44100.0, 1, true);
        m.set_scale_units("MIDI notes");
        m.add_note(0, 60.2, 1000, 0.5, "do");
        let notes = m.notes();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].midi_pitch, 60);
        assert_eq!(notes[0].frequency, None);
        assert_eq!(notes[0].velocity, 64);
        assert_eq!(notes[0].label, "do");
    }

    #[test]
    fn test_note_export_hz_units() {
        let m = NoteModel::new(44100.0, 1, true);
        m.set_scale_units("Hz");
        m.add_note(0, 440.0, 500, 0.0, "");
        let notes = m.notes();
        assert_eq!(notes[0].midi_pitch, 69);
        assert_eq!(notes[0].frequency, Some(440.0));
        // absent level falls back to the default velocity
        assert_eq!(notes[0].velocity, 100);
    }

    #[test]
    fn test_note_tabular() {
        let m = NoteModel::new(44100.0, 1, true);
        m.add_note(44100, 69.0, 22050, 1.0, "A");
        assert_eq!(m.row_count(), 1);
        assert_eq!(m.heading(2), "Pitch");
        assert_eq!(m.cell(0, 0), "1.000");
        assert_eq!(m.cell(0, 1), "44100");
        assert_eq!(m.cell(0, 2), "69");
        assert_eq!(m.cell(0, 5), "A");
        assert_eq!(m.cell(5, 0), "");
    }

    #[test]
    fn test_region_queries() {
        let m = RegionModel::new(44100.0, 1, true);
        m.add_region(100, 1.0, 50, "r1");
        m.add_region(120, 2.0, 10, "r2");
        assert_eq!(m.events_covering(125).len(), 2);
        assert_eq!(m.events_covering(115).len(), 1);
        assert_eq!(m.start_frame(), 100);
        assert_eq!(m.end_frame(), 150);
    }

    #[test]
    fn test_xml_shape() {
        let m = SparseTimeValueModel::new(8000.0, 2, true);
        m.set_scale_units("V");
        m.add_point(4, 0.5, "p");
        let mut out = String::new();
        m.to_xml(&mut out, "", "");
        assert!(out.contains("subtype=\"timevalue\""));
        assert!(out.contains("sampleRate=\"8000\""));
        assert!(out.contains("units=\"V\""));
        assert!(out.contains("<point frame=\"4\" value=\"0.5\" label=\"p\"/>"));
    }
}
