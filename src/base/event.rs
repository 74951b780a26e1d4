//! Immutable timeline event value type
//!
//! An event is a point or interval annotation bound to one or two frame
//! coordinates, with optional value, level and label. Events are immutable
//! after construction: the `with_*` methods return modified copies.

use crate::time::Frame;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Write as _;

/// A point or ranged annotation on the timeline.
///
/// An event with a duration covers the half-open frame interval
/// `[frame, frame + duration)`. An event without one represents an instant.
/// Equality is structural; ordering is lexicographic by
/// (frame, duration, value, label).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    frame: Frame,
    duration: Option<Frame>,
    value: Option<f32>,
    level: Option<f32>,
    label: Option<String>,
}

impl Event {
    /// A durationless, valueless, unlabelled event at the given frame.
    pub fn new(frame: Frame) -> Self {
        assert!(frame >= 0, "event frame must be non-negative");
        Event {
            frame,
            duration: None,
            value: None,
            level: None,
            label: None,
        }
    }

    pub fn with_frame(&self, frame: Frame) -> Self {
        assert!(frame >= 0, "event frame must be non-negative");
        let mut e = self.clone();
        e.frame = frame;
        e
    }

    pub fn with_duration(&self, duration: Frame) -> Self {
        assert!(duration >= 0, "event duration must be non-negative");
        let mut e = self.clone();
        e.duration = Some(duration);
        e
    }

    pub fn without_duration(&self) -> Self {
        let mut e = self.clone();
        e.duration = None;
        e
    }

    pub fn with_value(&self, value: f32) -> Self {
        let mut e = self.clone();
        e.value = Some(value);
        e
    }

    pub fn with_level(&self, level: f32) -> Self {
        let mut e = self.clone();
        e.level = Some(level);
        e
    }

    pub fn with_label(&self, label: impl Into<String>) -> Self {
        let mut e = self.clone();
        e.label = Some(label.into());
        e
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn has_duration(&self) -> bool {
        self.duration.is_some()
    }

    /// Duration in frames; 0 for a durationless event.
    pub fn duration(&self) -> Frame {
        self.duration.unwrap_or(0)
    }

    /// First frame beyond the event's extent.
    pub fn end_frame(&self) -> Frame {
        self.frame + self.duration()
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> f32 {
        self.value.unwrap_or(0.0)
    }

    pub fn has_level(&self) -> bool {
        self.level.is_some()
    }

    pub fn level(&self) -> f32 {
        self.level.unwrap_or(0.0)
    }

    pub fn has_label(&self) -> bool {
        self.label.is_some()
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("")
    }

    /// True if the event's interval covers the given frame. A durationless
    /// event covers only its own frame.
    pub fn covers(&self, frame: Frame) -> bool {
        match self.duration {
            Some(d) => self.frame <= frame && frame < self.frame + d,
            None => self.frame == frame,
        }
    }

    /// Append a `<point .../>` element for this event.
    pub fn to_xml(&self, out: &mut String, indent: &str, extra_attributes: &str) {
        let _ = write!(out, "{}<point frame=\"{}\"", indent, self.frame);
        if let Some(d) = self.duration {
            let _ = write!(out, " duration=\"{}\"", d);
        }
        if let Some(v) = self.value {
            let _ = write!(out, " value=\"{}\"", v);
        }
        if let Some(l) = self.level {
            let _ = write!(out, " level=\"{}\"", l);
        }
        if let Some(ref label) = self.label {
            let _ = write!(out, " label=\"{}\"", xml_escape(label));
        }
        if !extra_attributes.is_empty() {
            let _ = write!(out, " {}", extra_attributes);
        }
        out.push_str("/>\n");
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn opt_f32_cmp(a: Option<f32>, b: Option<f32>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.total_cmp(&y),
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.frame
            .cmp(&other.frame)
            .then(self.duration.cmp(&other.duration))
            .then(opt_f32_cmp(self.value, other.value))
            .then(self.label.cmp(&other.label))
            .then(opt_f32_cmp(self.level, other.level))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_copies() {
        let e = Event::new(10);
        let f = e.with_duration(20).with_value(1.5).with_label("x");
        assert!(!e.has_duration());
        assert!(f.has_duration());
        assert_eq!(f.frame(), 10);
        assert_eq!(f.duration(), 20);
        assert_eq!(f.end_frame(), 30);
        assert_eq!(f.value(), 1.5);
        assert_eq!(f.label(), "x");
    }

    #[test]
    fn test_ordering() {
        let a = Event::new(10);
        let b = Event::new(10).with_duration(5);
        let c = Event::new(10).with_duration(5).with_value(1.0);
        let d = Event::new(11);
        assert!(a < b); // durationless sorts first at same frame
        assert!(b < c);
        assert!(c < d);
    }

    #[test]
    fn test_structural_equality() {
        let a = Event::new(5).with_duration(2).with_value(0.5).with_label("n");
        let b = Event::new(5).with_duration(2).with_value(0.5).with_label("n");
        assert_eq!(a, b);
        assert_ne!(a, b.with_value(0.6));
    }

    #[test]
    fn test_covers() {
        let e = Event::new(100).with_duration(50);
        assert!(e.covers(100));
        assert!(e.covers(149));
        assert!(!e.covers(150));
        assert!(!e.covers(99));

        let p = Event::new(100);
        assert!(p.covers(100));
        assert!(!p.covers(101));
    }

    #[test]
    fn test_xml() {
        let e = Event::new(3).with_duration(4).with_value(0.25).with_label("a<b");
        let mut out = String::new();
        e.to_xml(&mut out, "  ", "");
        assert_eq!(
            out,
            "  <point frame=\"3\" duration=\"4\" value=\"0.25\" label=\"a&lt;b\"/>\n"
        );
    }
}
