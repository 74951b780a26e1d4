//! Transform descriptors
//!
//! A `Transform` names one plugin invocation: plugin id, parameters, step
//! and block geometry, analysis window, processing context, and which
//! plugin output to materialise. Several transforms that differ only in
//! output can be run through a single transformer against one plugin
//! instance.

use crate::time::RealTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WindowType {
    Rectangular,
    Bartlett,
    Hamming,
    #[default]
    Hanning,
    Blackman,
}

impl WindowType {
    /// The window shape at length `n`.
    pub fn shape(&self, n: usize) -> Vec<f32> {
        use std::f32::consts::TAU;
        let nf = n as f32;
        (0..n)
            .map(|i| {
                let x = i as f32;
                match self {
                    WindowType::Rectangular => 1.0,
                    WindowType::Bartlett => {
                        if n < 2 {
                            1.0
                        } else {
                            let half = (nf - 1.0) / 2.0;
                            1.0 - ((x - half) / half).abs()
                        }
                    }
                    WindowType::Hamming => 0.54 - 0.46 * (TAU * x / nf).cos(),
                    WindowType::Hanning => 0.5 - 0.5 * (TAU * x / nf).cos(),
                    WindowType::Blackman => {
                        0.42 - 0.5 * (TAU * x / nf).cos() + 0.08 * (2.0 * TAU * x / nf).cos()
                    }
                }
            })
            .collect()
    }
}

/// A plugin invocation descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    pub plugin_id: String,
    /// Plugin output identifier; empty means the plugin's first output.
    pub output: String,
    pub parameters: BTreeMap<String, f32>,
    pub program: Option<String>,
    /// 0 means "ask the plugin".
    pub step_size: usize,
    /// 0 means "ask the plugin".
    pub block_size: usize,
    pub window_type: WindowType,
    /// Context start; zero means the input's start.
    pub start_time: RealTime,
    /// Context duration; zero means "to the input's end".
    pub duration: RealTime,
    /// 0 means the input model's rate.
    pub sample_rate: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Transform {
            plugin_id: String::new(),
            output: String::new(),
            parameters: BTreeMap::new(),
            program: None,
            step_size: 0,
            block_size: 0,
            window_type: WindowType::default(),
            start_time: RealTime::zero(),
            duration: RealTime::zero(),
            sample_rate: 0.0,
        }
    }
}

impl Transform {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Transform {
            plugin_id: plugin_id.into(),
            ..Transform::default()
        }
    }

    /// Equal in every respect except possibly the chosen output.
    pub fn is_similar_to(&self, other: &Transform) -> bool {
        let mut o = other.clone();
        o.output = self.output.clone();
        *self == o
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_ignores_output_only() {
        let mut a = Transform::new("plug:one");
        a.step_size = 512;
        a.output = "peaks".to_string();

        let mut b = a.clone();
        b.output = "spectrum".to_string();
        assert!(a.is_similar_to(&b));

        let mut c = b.clone();
        c.step_size = 256;
        assert!(!a.is_similar_to(&c));
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut t = Transform::new("plug:one");
        t.parameters.insert("threshold".to_string(), 0.5);
        t.block_size = 2048;
        let json = serde_json::to_string(&t).unwrap();
        let back: Transform = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn test_hanning_window_shape() {
        let w = WindowType::Hanning.shape(8);
        assert_eq!(w.len(), 8);
        assert!(w[0].abs() < 1e-6); // zero at the edge
        assert!((w[4] - 1.0).abs() < 1e-6); // unity at the middle
    }

    #[test]
    fn test_rectangular_window() {
        assert_eq!(WindowType::Rectangular.shape(4), vec![1.0; 4]);
    }
}
