//! Output level visualization.
//!
//! Mirrors a browser analyser node: a 256-point Blackman-windowed DFT of the
//! most recent output samples, time-smoothed per bin, converted to decibels
//! and scaled into bytes. Purely cosmetic; a skipped tick changes nothing.

use std::f64::consts::PI;

pub const WINDOW_SIZE: usize = 256;
pub const BIN_COUNT: usize = WINDOW_SIZE / 2;
pub const BAR_COUNT: usize = 60;

const SMOOTHING: f64 = 0.8;
const MIN_DB: f64 = -100.0;
const MAX_DB: f64 = -30.0;

/// Bar heights, matching the radial display: `value / 255 * 60 + 5`
const BAR_SCALE: f32 = 60.0;
const BAR_BASE: f32 = 5.0;

const BLOCKS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

pub struct Visualizer {
    window: Vec<f64>,
    smoothed: Vec<f64>,
    bytes: Vec<u8>,
}

impl Visualizer {
    pub fn new() -> Self {
        let window = (0..WINDOW_SIZE)
            .map(|n| {
                let x = n as f64 / WINDOW_SIZE as f64;
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            })
            .collect();

        Self {
            window,
            smoothed: vec![0.0; BIN_COUNT],
            bytes: vec![0; BIN_COUNT],
        }
    }

    /// Analyse the latest output samples; shorter input is zero-padded at the front
    pub fn tap(&mut self, samples: &[f32]) {
        let tail = &samples[samples.len().saturating_sub(WINDOW_SIZE)..];
        let pad = WINDOW_SIZE - tail.len();
        let frame: Vec<f64> = std::iter::repeat(0.0)
            .take(pad)
            .chain(tail.iter().map(|s| *s as f64))
            .zip(&self.window)
            .map(|(s, w)| s * w)
            .collect();

        for k in 0..BIN_COUNT {
            let (mut re, mut im) = (0.0, 0.0);
            for (n, x) in frame.iter().enumerate() {
                let phase = 2.0 * PI * (k * n) as f64 / WINDOW_SIZE as f64;
                re += x * phase.cos();
                im -= x * phase.sin();
            }
            let magnitude = (re * re + im * im).sqrt() / WINDOW_SIZE as f64;

            let smoothed = SMOOTHING * self.smoothed[k] + (1.0 - SMOOTHING) * magnitude;
            self.smoothed[k] = if smoothed.is_finite() { smoothed } else { 0.0 };
            self.bytes[k] = to_byte(self.smoothed[k]);
        }
    }

    /// Byte-scaled magnitude per frequency bin
    pub fn frequency_data(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bars(&self) -> Vec<f32> {
        (0..BAR_COUNT)
            .map(|i| {
                let value = self.bytes[i % BIN_COUNT] as f32;
                value / 255.0 * BAR_SCALE + BAR_BASE
            })
            .collect()
    }

    /// One line of block characters, one per bar
    pub fn render(&self) -> String {
        let max = BAR_SCALE + BAR_BASE;
        self.bars()
            .into_iter()
            .map(|h| {
                let level = ((h - BAR_BASE) / (max - BAR_BASE) * (BLOCKS.len() - 1) as f32).round();
                BLOCKS[(level.max(0.0) as usize).min(BLOCKS.len() - 1)]
            })
            .collect()
    }
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new()
    }
}

fn to_byte(magnitude: f64) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DB) / (MAX_DB - MIN_DB);
    scaled.clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_flat() {
        let mut viz = Visualizer::new();
        viz.tap(&[0.0; WINDOW_SIZE]);

        assert!(viz.frequency_data().iter().all(|b| *b == 0));
        assert!(viz.bars().iter().all(|h| (*h - 5.0).abs() < f32::EPSILON));
        assert_eq!(viz.render().chars().count(), BAR_COUNT);
    }

    #[test]
    fn test_tone_lights_its_bin() {
        let mut viz = Visualizer::new();
        // Bin 16 of a 256-point window
        let tone: Vec<f32> = (0..WINDOW_SIZE)
            .map(|n| (2.0 * std::f32::consts::PI * 16.0 * n as f32 / WINDOW_SIZE as f32).sin() * 0.001)
            .collect();

        for _ in 0..20 {
            viz.tap(&tone);
        }

        let data = viz.frequency_data();
        let peak = data
            .iter()
            .enumerate()
            .max_by_key(|(_, v)| **v)
            .map(|(i, _)| i);
        assert_eq!(peak, Some(16));
        assert!(data[16] > data[60]);
    }

    #[test]
    fn test_smoothing_decays_gradually() {
        let mut viz = Visualizer::new();
        let quiet = vec![0.001_f32; WINDOW_SIZE];
        for _ in 0..20 {
            viz.tap(&quiet);
        }
        let before = viz.frequency_data()[0];

        viz.tap(&[0.0; WINDOW_SIZE]);
        let after = viz.frequency_data()[0];
        assert!(after > 0 && after < before);
    }

    #[test]
    fn test_short_input_is_padded() {
        let mut viz = Visualizer::new();
        viz.tap(&[0.1; 10]);
        assert_eq!(viz.frequency_data().len(), BIN_COUNT);
    }
}
