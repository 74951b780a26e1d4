//! Column-indexed feature grid
//!
//! Dense three-dimensional data: for each column (a frame position divided
//! by the model resolution) a fixed-size vector of bin values. The
//! transformer materialises gridded plugin outputs here, one column per
//! feature.

use crate::model::{CompletionState, Model, ModelBase, NotifyMode};
use crate::time::Frame;
use std::fmt::Write as _;
use std::sync::Mutex;

pub struct EditableDenseThreeDimensionalModel {
    base: ModelBase,
    resolution: Frame,
    bin_count: usize,
    columns: Mutex<Vec<Vec<f32>>>,
    bin_names: Mutex<Vec<String>>,
    extents: Mutex<(f32, f32, bool)>,
    completion: CompletionState,
}

impl EditableDenseThreeDimensionalModel {
    pub fn new(
        sample_rate: f64,
        resolution: Frame,
        bin_count: usize,
        notify_on_add: bool,
    ) -> Self {
        let mode = if notify_on_add {
            NotifyMode::OnAdd
        } else {
            NotifyMode::Deferred
        };
        let completion = if notify_on_add { 100 } else { 0 };
        EditableDenseThreeDimensionalModel {
            base: ModelBase::new(sample_rate, mode),
            resolution: resolution.max(1),
            bin_count,
            columns: Mutex::new(Vec::new()),
            bin_names: Mutex::new(Vec::new()),
            extents: Mutex::new((0.0, 0.0, false)),
            completion: CompletionState::new(completion),
        }
    }

    pub fn resolution(&self) -> Frame {
        self.resolution
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.lock().unwrap().len()
    }

    pub fn bin_names(&self) -> Vec<String> {
        self.bin_names.lock().unwrap().clone()
    }

    pub fn set_bin_names(&self, names: Vec<String>) {
        *self.bin_names.lock().unwrap() = names;
    }

    /// Replace the values of one column, padding or truncating to the bin
    /// count. Absent intermediate columns spring into existence as zeros.
    pub fn set_column(&self, index: usize, values: &[f32]) {
        {
            let mut columns = self.columns.lock().unwrap();
            if columns.len() <= index {
                columns.resize_with(index + 1, || vec![0.0; self.bin_count]);
            }
            let mut column = values.to_vec();
            column.resize(self.bin_count, 0.0);
            columns[index] = column;
        }

        {
            let mut extents = self.extents.lock().unwrap();
            for &v in values.iter().take(self.bin_count) {
                if !extents.2 {
                    *extents = (v, v, true);
                } else {
                    if v < extents.0 {
                        extents.0 = v;
                    }
                    if v > extents.1 {
                        extents.1 = v;
                    }
                }
            }
        }

        let start = index as Frame * self.resolution;
        self.base.notifier().update(start, start + self.resolution);
    }

    pub fn column(&self, index: usize) -> Vec<f32> {
        self.columns
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .unwrap_or_else(|| vec![0.0; self.bin_count])
    }

    pub fn value_minimum(&self) -> f32 {
        self.extents.lock().unwrap().0
    }

    pub fn value_maximum(&self) -> f32 {
        self.extents.lock().unwrap().1
    }

    pub fn set_completion(&self, completion: i32, update: bool) {
        self.completion.set(completion, update, self.base.notifier());
    }
}

impl Model for EditableDenseThreeDimensionalModel {
    fn base(&self) -> &ModelBase {
        &self.base
    }

    fn start_frame(&self) -> Frame {
        0
    }

    fn end_frame(&self) -> Frame {
        self.column_count() as Frame * self.resolution
    }

    fn completion(&self) -> i32 {
        self.completion.get()
    }

    fn type_name(&self) -> &'static str {
        "Editable Dense 3-D"
    }

    fn to_xml(&self, out: &mut String, indent: &str, extra_attributes: &str) {
        let mut attrs = self.base.xml_attributes();
        let _ = write!(
            attrs,
            " subtype=\"grid\" resolution=\"{}\" binCount=\"{}\"",
            self.resolution, self.bin_count
        );
        if !extra_attributes.is_empty() {
            let _ = write!(attrs, " {}", extra_attributes);
        }
        let _ = writeln!(out, "{}<dataset {}>", indent, attrs);
        let columns = self.columns.lock().unwrap();
        for (i, column) in columns.iter().enumerate() {
            let values: Vec<String> = column.iter().map(|v| v.to_string()).collect();
            let _ = writeln!(
                out,
                "{}  <row n=\"{}\">{}</row>",
                indent,
                i,
                values.join(" ")
            );
        }
        drop(columns);
        let _ = writeln!(out, "{}</dataset>", indent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_column_pads_and_grows() {
        let m = EditableDenseThreeDimensionalModel::new(44100.0, 512, 3, true);
        m.set_column(2, &[1.0, 2.0]);
        assert_eq!(m.column_count(), 3);
        assert_eq!(m.column(0), vec![0.0, 0.0, 0.0]);
        assert_eq!(m.column(2), vec![1.0, 2.0, 0.0]);
        assert_eq!(m.end_frame(), 3 * 512);
    }

    #[test]
    fn test_extents_track_values() {
        let m = EditableDenseThreeDimensionalModel::new(44100.0, 1, 2, true);
        m.set_column(0, &[-1.5, 4.0]);
        m.set_column(1, &[0.0, 9.0]);
        assert_eq!(m.value_minimum(), -1.5);
        assert_eq!(m.value_maximum(), 9.0);
    }

    #[test]
    fn test_truncates_overlong_column() {
        let m = EditableDenseThreeDimensionalModel::new(44100.0, 1, 2, true);
        m.set_column(0, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(m.column(0), vec![1.0, 2.0]);
    }
}
