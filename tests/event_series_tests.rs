//! Integration scenarios for the event series and its seam index

use annopipe::base::{Direction, Event, EventSeries};

#[test]
fn test_overlapping_regions_coverage_scenario() {
    let mut series = EventSeries::new();
    series.add(Event::new(100).with_duration(50));
    series.add(Event::new(120).with_duration(10));

    assert_eq!(series.events_covering(125).len(), 2);
    assert_eq!(series.events_covering(115).len(), 1);
    assert_eq!(series.events_covering(115)[0].frame(), 100);
    assert!(series.events_covering(200).is_empty());
}

#[test]
fn test_final_durationless_frame_scenario() {
    let mut series = EventSeries::new();
    for frame in [10, 20, 30] {
        series.add(Event::new(frame));
    }
    assert_eq!(series.final_durationless_frame(), 30);

    series.remove(&Event::new(30));
    assert_eq!(series.final_durationless_frame(), 20);

    series.remove(&Event::new(10));
    assert_eq!(series.final_durationless_frame(), 20);
}

#[test]
fn test_spanning_equals_brute_force_on_mixed_workload() {
    let mut series = EventSeries::new();
    for i in 0..60i64 {
        match i % 3 {
            0 => series.add(Event::new((i * 11) % 200)),
            1 => series.add(Event::new((i * 7) % 180).with_duration(1 + (i * 17) % 60)),
            _ => series.add(
                Event::new((i * 13) % 190)
                    .with_duration(5)
                    .with_value((i % 10) as f32),
            ),
        }
    }

    let all = series.all_events();
    for start in (0..260).step_by(11) {
        let duration = 17;
        let mut expected: Vec<Event> = all
            .iter()
            .filter(|e| {
                if e.has_duration() {
                    e.frame() < start + duration && e.end_frame() > start
                } else {
                    e.frame() >= start && e.frame() < start + duration
                }
            })
            .cloned()
            .collect();
        expected.sort();

        let mut got = series.events_spanning(start, duration);
        got.sort();

        assert_eq!(got, expected, "spanning mismatch at [{}, {})", start, start + duration);
    }
}

#[test]
fn test_add_remove_restores_series_exactly() {
    let mut series = EventSeries::new();
    series.add(Event::new(10).with_duration(30).with_label("base"));
    series.add(Event::new(25));
    series.add(Event::new(40).with_duration(5));
    let snapshot = series.clone();

    // interleave additions and removals of a batch of extra events
    let extras: Vec<Event> = (0..10)
        .map(|i| Event::new(5 + i * 7).with_duration(12).with_value(i as f32))
        .collect();
    for e in &extras {
        series.add(e.clone());
    }
    for e in extras.iter().rev() {
        series.remove(e);
    }

    assert_eq!(series, snapshot);
}

#[test]
fn test_duplicate_events_count_and_purge() {
    let mut series = EventSeries::new();
    let e = Event::new(100).with_duration(40).with_label("dup");
    for _ in 0..4 {
        series.add(e.clone());
    }
    assert_eq!(series.count(), 4);
    assert_eq!(series.events_covering(120).len(), 4);
    assert_eq!(series.events_spanning(90, 100).len(), 4);

    for expected_left in (0..4).rev() {
        series.remove(&e);
        assert_eq!(series.count(), expected_left);
        assert_eq!(series.events_covering(120).len(), expected_left as usize);
    }
}

#[test]
fn test_navigation_across_the_sequence() {
    let mut series = EventSeries::new();
    let events: Vec<Event> = (1..=5)
        .map(|i| Event::new(i * 100).with_value(i as f32))
        .collect();
    for e in &events {
        series.add(e.clone());
    }

    assert_eq!(series.event_preceding(&events[2]), Some(events[1].clone()));
    assert_eq!(series.event_following(&events[2]), Some(events[3].clone()));

    let found = series
        .nearest_event_matching(250, |e| e.value() >= 4.0, Direction::Forward)
        .unwrap();
    assert_eq!(found.frame(), 400);

    let found = series
        .nearest_event_matching(250, |e| e.frame() < 250, Direction::Backward)
        .unwrap();
    assert_eq!(found.frame(), 200);
}

#[test]
fn test_xml_dataset_round_shape() {
    let mut series = EventSeries::new();
    series.add(Event::new(10).with_value(0.5).with_label("a"));
    series.add(Event::new(20).with_duration(5));

    let mut out = String::new();
    series.to_xml(&mut out, "  ", "id=\"7\"");

    assert!(out.contains("<dataset id=\"7\">"));
    assert!(out.contains("<point frame=\"10\" value=\"0.5\" label=\"a\"/>"));
    assert!(out.contains("<point frame=\"20\" duration=\"5\"/>"));
}
