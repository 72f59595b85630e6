//! Trailing-window statistics per patient.
//!
//! Each patient's slice is walked once per (channel, window) with a fixed
//! capacity ring buffer. Windows count rows, not calendar days.

use crate::features::frame::{Column, ColumnKind, LongitudinalFrame};
use crate::stats;
use rayon::prelude::*;
use std::collections::VecDeque;

/// Ring buffer over the last `capacity` cells of one channel.
#[derive(Debug, Clone)]
pub struct WindowAccumulator {
    capacity: usize,
    cells: VecDeque<Option<f64>>,
}

impl WindowAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            cells: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: Option<f64>) {
        if self.cells.len() == self.capacity {
            self.cells.pop_front();
        }
        self.cells.push_back(value);
    }

    /// `(position in window, value)` for every valid cell.
    fn valid_points(&self) -> Vec<(f64, f64)> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.filter(|x| x.is_finite()).map(|x| (i as f64, x)))
            .collect()
    }

    pub fn mean(&self) -> Option<f64> {
        let values: Vec<f64> = self.valid_points().into_iter().map(|(_, v)| v).collect();
        stats::mean(&values)
    }

    /// Sample standard deviation; `None` below two valid points.
    pub fn std(&self) -> Option<f64> {
        let values: Vec<f64> = self.valid_points().into_iter().map(|(_, v)| v).collect();
        stats::sample_std(&values)
    }

    /// OLS slope against the position in the window; exactly 0 below two valid points.
    pub fn slope(&self) -> f64 {
        let points = self.valid_points();
        if points.len() < 2 {
            return 0.0;
        }
        stats::ols_slope(&points).unwrap_or(0.0)
    }
}

/// Statistic columns for one (channel, window) pair over one patient's slice.
pub fn window_statistics(values: &[Option<f64>], window: usize) -> [Vec<Option<f64>>; 3] {
    let mut acc = WindowAccumulator::new(window);
    let mut means = Vec::with_capacity(values.len());
    let mut stds = Vec::with_capacity(values.len());
    let mut slopes = Vec::with_capacity(values.len());
    for &v in values {
        acc.push(v);
        means.push(acc.mean());
        stds.push(acc.std());
        slopes.push(Some(acc.slope()));
    }
    [means, stds, slopes]
}

/// Appends `{ch}_mean_{w}d`, `{ch}_std_{w}d` and `{ch}_slope_{w}d` for every
/// channel present in the frame.
pub fn add_rolling_features(
    frame: &mut LongitudinalFrame,
    channels: &[String],
    windows: &[usize],
) -> Vec<String> {
    let mut added = Vec::new();
    for channel in channels {
        let Some(source) = frame.values(channel).map(<[_]>::to_vec) else {
            log::debug!("Rolling channel '{channel}' not present, skipping");
            continue;
        };
        for &window in windows {
            let pieces: Vec<[Vec<Option<f64>>; 3]> = frame
                .partitions()
                .par_iter()
                .map(|p| window_statistics(&source[p.rows.clone()], window))
                .collect();
            for (stat, label) in ["mean", "std", "slope"].iter().enumerate() {
                let values: Vec<Option<f64>> = pieces
                    .iter()
                    .flat_map(|piece| piece[stat].iter().copied())
                    .collect();
                let name = format!("{channel}_{label}_{window}d");
                frame.push_column(Column::new(name.clone(), ColumnKind::Rolling, values));
                added.push(name);
            }
        }
    }
    added
}
