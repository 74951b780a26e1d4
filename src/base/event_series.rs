//! Ordered event store with an interval-query index
//!
//! `EventSeries` keeps events in a sorted multiset and maintains a secondary
//! "seam map" from frame to the set of durationful events covering that
//! frame. The seam map is consulted only by the interval queries
//! (`events_spanning`, `events_covering`); everything else works off the
//! ordered sequence.
//!
//! Seam map invariants:
//! - keys are exactly the distinct start/end boundaries of durationful
//!   events present in the series;
//! - the coverage vector at key k holds the durationful events e with
//!   `e.frame() <= k < e.end_frame()`;
//! - no two adjacent keys carry identical coverage sets.

use crate::base::event::Event;
use crate::time::Frame;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// Search direction for [`EventSeries::nearest_event_matching`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Ordered multiset of events plus the seam map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSeries {
    events: Vec<Event>,
    seams: BTreeMap<Frame, Vec<Event>>,
    final_durationless_frame: Frame,
}

impl EventSeries {
    pub fn new() -> Self {
        EventSeries::default()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events in the series.
    ///
    /// Panics if the series has grown beyond `i32::MAX` events; callers
    /// treat that as an unrecoverable logic error.
    pub fn count(&self) -> i32 {
        assert!(
            self.events.len() <= i32::MAX as usize,
            "too many events in series"
        );
        self.events.len() as i32
    }

    pub fn add(&mut self, e: Event) {
        let pos = self.events.partition_point(|x| x < &e);
        let is_unique = !(pos < self.events.len() && self.events[pos] == e);
        self.events.insert(pos, e.clone());

        if !e.has_duration() && e.frame() > self.final_durationless_frame {
            self.final_durationless_frame = e.frame();
        }

        if e.has_duration() && is_unique {
            let frame = e.frame();
            let end_frame = e.end_frame();

            self.create_seam(frame);
            self.create_seam(end_frame);

            for (_, coverage) in self.seams.range_mut(frame..end_frame) {
                coverage.push(e.clone());
            }
        }
    }

    pub fn remove(&mut self, e: &Event) {
        // If we are removing the last (unique) occurrence of an event, it
        // must also come out of the seam map. If this is one of several
        // identical events, the seam map is untouched.
        let pos = self.events.partition_point(|x| x < e);
        if pos >= self.events.len() || self.events[pos] != *e {
            // we don't know this event
            return;
        }
        let is_unique = !(pos + 1 < self.events.len() && self.events[pos + 1] == *e);

        self.events.remove(pos);

        if !e.has_duration() && is_unique && e.frame() == self.final_durationless_frame {
            self.final_durationless_frame = 0;
            for x in self.events.iter().rev() {
                if !x.has_duration() {
                    self.final_durationless_frame = x.frame();
                    break;
                }
            }
        }

        if e.has_duration() && is_unique {
            let frame = e.frame();
            let end_frame = e.end_frame();

            for (_, coverage) in self.seams.range_mut(frame..end_frame) {
                coverage.retain(|x| x != e);
            }

            // Tidy up by removing any entries now identical to their
            // predecessors, scanning from the event's start seam up to and
            // including its end seam.
            let keys: Vec<Frame> = self.seams.range(frame..).map(|(k, _)| *k).collect();
            let mut redundant = Vec::new();
            let mut prev = self.seams.range(..frame).next_back().map(|(k, _)| *k);
            for k in keys {
                if let Some(p) = prev {
                    if self.seams[&k] == self.seams[&p] {
                        redundant.push(k);
                    }
                }
                prev = Some(k);
                if k == end_frame {
                    break;
                }
            }
            for k in redundant {
                self.seams.remove(&k);
            }

            // And drop any empty coverage sets from the front of the map
            while let Some((&k, coverage)) = self.seams.iter().next() {
                if coverage.is_empty() {
                    self.seams.remove(&k);
                } else {
                    break;
                }
            }
        }
    }

    pub fn contains(&self, e: &Event) -> bool {
        self.events.binary_search(e).is_ok()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.seams.clear();
        self.final_durationless_frame = 0;
    }

    pub fn start_frame(&self) -> Frame {
        match self.events.first() {
            Some(e) => e.frame(),
            None => 0,
        }
    }

    pub fn end_frame(&self) -> Frame {
        if self.events.is_empty() {
            return 0;
        }
        let mut latest = self.final_durationless_frame;
        if let Some((&last_seam, _)) = self.seams.iter().next_back() {
            if last_seam > latest {
                latest = last_seam;
            }
        }
        latest
    }

    /// All events that overlap the half-open interval `[frame, frame+duration)`.
    pub fn events_spanning(&self, frame: Frame, duration: Frame) -> Vec<Event> {
        let mut span = Vec::new();

        let start = frame;
        let end = frame + duration;

        // first any zero-duration events, from the sequence
        let mut pos = self.lower_bound(start);
        while pos < self.events.len() && self.events[pos].frame() < end {
            if !self.events[pos].has_duration() {
                span.push(self.events[pos].clone());
            }
            pos += 1;
        }

        // then any durationful ones from the seam map, starting one key
        // before the range to catch intervals that began earlier
        let mut found: BTreeSet<Event> = BTreeSet::new();
        let from = self
            .seams
            .range(..=start)
            .next_back()
            .map(|(k, _)| *k)
            .unwrap_or(start);
        for (_, coverage) in self.seams.range(from..end) {
            for e in coverage {
                found.insert(e.clone());
            }
        }
        for e in &found {
            self.push_occurrences(e, &mut span);
        }

        span
    }

    /// Events strictly contained in `[frame, frame+duration)` — a durationful
    /// event is admitted only if its end lies within the range — plus up to
    /// `overspill` events immediately before and after.
    pub fn events_within(&self, frame: Frame, duration: Frame, overspill: usize) -> Vec<Event> {
        let mut span = Vec::new();

        let start = frame;
        let end = frame + duration;

        // No need to look back at events that end within but started
        // without, so this works entirely off the sequence.
        let reference = self.lower_bound(start);

        let first = reference.saturating_sub(overspill);
        for i in first..reference {
            span.push(self.events[i].clone());
        }

        let mut last = reference;
        let mut i = reference;
        while i < self.events.len() && self.events[i].frame() < end {
            let e = &self.events[i];
            if !e.has_duration() || e.end_frame() <= end {
                span.push(e.clone());
                last = i + 1;
            }
            i += 1;
        }

        let trailing_end = (last + overspill).min(self.events.len());
        for i in last..trailing_end {
            span.push(self.events[i].clone());
        }

        span
    }

    /// Events whose start frame lies in `[frame, frame+duration)`.
    pub fn events_starting_within(&self, frame: Frame, duration: Frame) -> Vec<Event> {
        let mut span = Vec::new();
        let end = frame + duration;
        let mut pos = self.lower_bound(frame);
        while pos < self.events.len() && self.events[pos].frame() < end {
            span.push(self.events[pos].clone());
            pos += 1;
        }
        span
    }

    /// Union of durationless events at exactly `frame` and durationful
    /// events whose interval covers it.
    pub fn events_covering(&self, frame: Frame) -> Vec<Event> {
        let mut cover = Vec::new();

        let mut pos = self.lower_bound(frame);
        while pos < self.events.len() && self.events[pos].frame() == frame {
            if !self.events[pos].has_duration() {
                cover.push(self.events[pos].clone());
            }
            pos += 1;
        }

        let mut found: BTreeSet<Event> = BTreeSet::new();
        if let Some((_, coverage)) = self.seams.range(..=frame).next_back() {
            for e in coverage {
                found.insert(e.clone());
            }
        }
        for e in &found {
            self.push_occurrences(e, &mut cover);
        }

        cover
    }

    pub fn all_events(&self) -> Vec<Event> {
        self.events.clone()
    }

    /// The event ordered immediately before `e`, which must itself be in the
    /// series.
    pub fn event_preceding(&self, e: &Event) -> Option<Event> {
        let pos = self.events.partition_point(|x| x < e);
        if pos >= self.events.len() || self.events[pos] != *e {
            return None;
        }
        if pos == 0 {
            return None;
        }
        Some(self.events[pos - 1].clone())
    }

    /// The first event ordered after the run of events equal to `e`, which
    /// must itself be in the series.
    pub fn event_following(&self, e: &Event) -> Option<Event> {
        let mut pos = self.events.partition_point(|x| x < e);
        if pos >= self.events.len() || self.events[pos] != *e {
            return None;
        }
        while pos < self.events.len() && self.events[pos] == *e {
            pos += 1;
        }
        self.events.get(pos).cloned()
    }

    /// Walk the sequence from the lower bound of `start_frame` in the given
    /// direction, returning the first event matching the predicate.
    pub fn nearest_event_matching<P>(
        &self,
        start_frame: Frame,
        predicate: P,
        direction: Direction,
    ) -> Option<Event>
    where
        P: Fn(&Event) -> bool,
    {
        let mut pos = self.lower_bound(start_frame);
        loop {
            match direction {
                Direction::Backward => {
                    if pos == 0 {
                        return None;
                    }
                    pos -= 1;
                }
                Direction::Forward => {
                    if pos >= self.events.len() {
                        return None;
                    }
                }
            }

            let e = &self.events[pos];
            if predicate(e) {
                return Some(e.clone());
            }

            if direction == Direction::Forward {
                pos += 1;
            }
        }
    }

    pub fn event_by_index(&self, index: usize) -> Option<Event> {
        self.events.get(index).cloned()
    }

    pub fn index_for_event(&self, e: &Event) -> usize {
        self.events.partition_point(|x| x < e)
    }

    /// Largest frame among durationless events, or 0 if there are none.
    pub fn final_durationless_frame(&self) -> Frame {
        self.final_durationless_frame
    }

    /// Append a `<dataset>` element wrapping one `<point>` per event.
    pub fn to_xml(&self, out: &mut String, indent: &str, extra_attributes: &str) {
        let _ = writeln!(out, "{}<dataset {}>", indent, extra_attributes);
        let inner = format!("{}  ", indent);
        for e in &self.events {
            e.to_xml(out, &inner, "");
        }
        let _ = writeln!(out, "{}</dataset>", indent);
    }

    fn lower_bound(&self, frame: Frame) -> usize {
        self.events.partition_point(|x| x.frame() < frame)
    }

    fn push_occurrences(&self, e: &Event, out: &mut Vec<Event>) {
        let mut pos = self.events.partition_point(|x| x < e);
        while pos < self.events.len() && self.events[pos] == *e {
            out.push(e.clone());
            pos += 1;
        }
    }

    fn create_seam(&mut self, frame: Frame) {
        if !self.seams.contains_key(&frame) {
            // A new seam starts out as a copy of its predecessor's
            // coverage: splitting an interval must not change what any
            // frame is covered by.
            let prior = self
                .seams
                .range(..frame)
                .next_back()
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            self.seams.insert(frame, prior);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force_covering(s: &EventSeries, frame: Frame) -> Vec<Event> {
        s.all_events()
            .into_iter()
            .filter(|e| e.covers(frame))
            .collect()
    }

    fn brute_force_spanning(s: &EventSeries, frame: Frame, duration: Frame) -> Vec<Event> {
        s.all_events()
            .into_iter()
            .filter(|e| {
                if e.has_duration() {
                    e.frame() < frame + duration && e.end_frame() > frame
                } else {
                    e.frame() >= frame && e.frame() < frame + duration
                }
            })
            .collect()
    }

    fn sorted(mut v: Vec<Event>) -> Vec<Event> {
        v.sort();
        v
    }

    #[test]
    fn test_empty() {
        let s = EventSeries::new();
        assert!(s.is_empty());
        assert_eq!(s.count(), 0);
        assert_eq!(s.start_frame(), 0);
        assert_eq!(s.end_frame(), 0);
        assert!(s.events_covering(0).is_empty());
    }

    #[test]
    fn test_covering_two_overlapping_regions() {
        let mut s = EventSeries::new();
        let a = Event::new(100).with_duration(50);
        let b = Event::new(120).with_duration(10);
        s.add(a.clone());
        s.add(b.clone());

        assert_eq!(sorted(s.events_covering(125)), vec![a.clone(), b.clone()]);
        assert_eq!(s.events_covering(115), vec![a.clone()]);
        assert!(s.events_covering(200).is_empty());
        assert!(s.events_covering(99).is_empty());
        assert_eq!(s.events_covering(149), vec![a]);
    }

    #[test]
    fn test_final_durationless_frame_tracking() {
        let mut s = EventSeries::new();
        for f in [10, 20, 30] {
            s.add(Event::new(f));
        }
        assert_eq!(s.final_durationless_frame(), 30);

        s.remove(&Event::new(30));
        assert_eq!(s.final_durationless_frame(), 20);

        s.remove(&Event::new(10));
        assert_eq!(s.final_durationless_frame(), 20);
    }

    #[test]
    fn test_add_remove_inverse() {
        let mut s = EventSeries::new();
        s.add(Event::new(5).with_duration(10));
        s.add(Event::new(8));
        let before = s.clone();

        let e = Event::new(7).with_duration(6).with_value(0.5);
        s.add(e.clone());
        assert_ne!(s, before);
        s.remove(&e);
        assert_eq!(s, before);
    }

    #[test]
    fn test_duplicate_semantics() {
        let mut s = EventSeries::new();
        let e = Event::new(40).with_duration(20).with_label("dup");
        for _ in 0..3 {
            s.add(e.clone());
        }
        assert_eq!(s.count(), 3);
        assert_eq!(s.events_covering(50).len(), 3);

        s.remove(&e);
        assert_eq!(s.count(), 2);
        assert_eq!(s.events_covering(50).len(), 2);

        s.remove(&e);
        s.remove(&e);
        assert_eq!(s.count(), 0);
        assert!(s.events_covering(50).is_empty());

        // removing an unknown event is a no-op
        s.remove(&e);
        assert_eq!(s.count(), 0);
    }

    #[test]
    fn test_covering_matches_brute_force_through_edits() {
        let mut s = EventSeries::new();
        let mut pool = Vec::new();
        // deterministic mixed workload: points and intervals, overlapping
        // and nested, with some duplicates
        for i in 0..40i64 {
            let e = if i % 3 == 0 {
                Event::new(i * 7 % 90)
            } else {
                Event::new(i * 5 % 80).with_duration(1 + (i * 13) % 40)
            };
            s.add(e.clone());
            pool.push(e);
            if i % 4 == 1 {
                let victim = pool.remove((i as usize * 3) % pool.len());
                s.remove(&victim);
            }
        }
        for f in 0..140 {
            assert_eq!(
                sorted(s.events_covering(f)),
                sorted(brute_force_covering(&s, f)),
                "covering mismatch at frame {}",
                f
            );
        }
    }

    #[test]
    fn test_spanning_matches_brute_force() {
        let mut s = EventSeries::new();
        for i in 0..30i64 {
            if i % 2 == 0 {
                s.add(Event::new(i * 4).with_duration(9));
            } else {
                s.add(Event::new(i * 6 % 100));
            }
        }
        for f in (0..130).step_by(7) {
            assert_eq!(
                sorted(s.events_spanning(f, 13)),
                sorted(brute_force_spanning(&s, f, 13)),
                "spanning mismatch at [{}, {})",
                f,
                f + 13
            );
        }
    }

    #[test]
    fn test_within_and_overspill() {
        let mut s = EventSeries::new();
        s.add(Event::new(0));
        s.add(Event::new(10).with_duration(5)); // ends at 15, inside
        s.add(Event::new(12).with_duration(20)); // ends at 32, outside
        s.add(Event::new(20));
        s.add(Event::new(50));

        let within = s.events_within(10, 15, 0);
        assert_eq!(
            within,
            vec![Event::new(10).with_duration(5), Event::new(20)]
        );

        let with_spill = s.events_within(10, 15, 1);
        assert_eq!(with_spill.first().unwrap(), &Event::new(0));
        assert_eq!(with_spill.last().unwrap(), &Event::new(50));
    }

    #[test]
    fn test_starting_within() {
        let mut s = EventSeries::new();
        s.add(Event::new(5).with_duration(100));
        s.add(Event::new(10));
        s.add(Event::new(15).with_duration(2));
        assert_eq!(
            s.events_starting_within(6, 10),
            vec![Event::new(10), Event::new(15).with_duration(2)]
        );
    }

    #[test]
    fn test_preceding_following() {
        let mut s = EventSeries::new();
        let a = Event::new(1);
        let b = Event::new(2);
        let c = Event::new(3);
        s.add(b.clone());
        s.add(a.clone());
        s.add(c.clone());

        assert_eq!(s.event_preceding(&b), Some(a.clone()));
        assert_eq!(s.event_following(&b), Some(c.clone()));
        assert_eq!(s.event_preceding(&a), None);
        assert_eq!(s.event_following(&c), None);
        assert_eq!(s.event_following(&Event::new(99)), None);
    }

    #[test]
    fn test_nearest_matching() {
        let mut s = EventSeries::new();
        for f in [10, 20, 30, 40] {
            s.add(Event::new(f).with_value((f / 10) as f32));
        }
        let found = s
            .nearest_event_matching(25, |e| e.value() > 3.0, Direction::Forward)
            .unwrap();
        assert_eq!(found.frame(), 40);

        let found = s
            .nearest_event_matching(25, |e| e.value() < 2.0, Direction::Backward)
            .unwrap();
        assert_eq!(found.frame(), 10);

        assert!(s
            .nearest_event_matching(25, |e| e.value() > 99.0, Direction::Forward)
            .is_none());
    }

    #[test]
    fn test_end_frame_mixed() {
        let mut s = EventSeries::new();
        s.add(Event::new(100));
        assert_eq!(s.end_frame(), 100);
        s.add(Event::new(50).with_duration(200));
        assert_eq!(s.end_frame(), 250);
    }

    #[test]
    fn test_xml_export() {
        let mut s = EventSeries::new();
        s.add(Event::new(1).with_value(2.0));
        let mut out = String::new();
        s.to_xml(&mut out, "", "id=\"4\"");
        assert!(out.starts_with("<dataset id=\"4\">\n"));
        assert!(out.contains("<point frame=\"1\" value=\"2\"/>"));
        assert!(out.ends_with("</dataset>\n"));
    }
}
