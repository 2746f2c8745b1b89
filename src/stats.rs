//! Series utilities shared by the profile calculator and the cost engine.

use itertools::Itertools;

use crate::{ Error, Result };

/// Normalize two sample sets by the maximum value observed across their
/// union, so that every value from either set lies in [0,1] and the two
/// stay comparable on one scale.
pub fn normalize_samples(s1: &[f64], s2: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let omax = s1.iter().chain(s2.iter())
        .fold(f64::NEG_INFINITY, |m, &x| m.max(x));
    (
        s1.iter().map(|x| x / omax).collect(),
        s2.iter().map(|x| x / omax).collect(),
    )
}

/// One-dimensional Earth Mover's (Wasserstein) distance between two
/// empirical distributions: the integral of the absolute difference of
/// their CDFs over the merged support.
///
/// An empty or non-finite input is a degenerate distribution and yields
/// NaN; callers recover it as a zero-contribution subcost.
pub fn wasserstein_distance(u: &[f64], v: &[f64]) -> f64 {
    if u.is_empty() || v.is_empty() {
        return f64::NAN;
    }
    if u.iter().chain(v.iter()).any(|x| !x.is_finite()) {
        return f64::NAN;
    }

    let mut us = u.to_vec();
    let mut vs = v.to_vec();
    us.sort_by(f64::total_cmp);
    vs.sort_by(f64::total_cmp);

    let mut support: Vec<f64> = Vec::with_capacity(us.len() + vs.len());
    support.extend_from_slice(&us);
    support.extend_from_slice(&vs);
    support.sort_by(f64::total_cmp);

    let mut dist = 0.0;
    for (lo, hi) in support.iter().tuple_windows() {
        let delta = hi - lo;
        if delta == 0.0 {
            continue;
        }
        let cu = rank(&us, *lo) as f64 / us.len() as f64;
        let cv = rank(&vs, *lo) as f64 / vs.len() as f64;
        dist += (cu - cv).abs() * delta;
    }
    dist
}

/// Number of elements in a sorted slice that are <= x.
fn rank(sorted: &[f64], x: f64) -> usize {
    sorted.partition_point(|v| *v <= x)
}

/// Drop missing samples from a series.
pub fn filter_missing(series: &[Option<f64>]) -> Vec<f64> {
    series.iter().filter_map(|v| *v).collect()
}

/// Elementwise sum of two series sampled at possibly different rates:
/// truncate both to the shorter length first. Series reconstructed from
/// different counter groups are never assumed aligned.
pub fn truncate_and_add(s1: &[f64], s2: &[f64]) -> Vec<f64> {
    s1.iter().zip(s2.iter()).map(|(a, b)| a + b).collect()
}

/// A cache-curve matrix: one row per phase, one column per associativity
/// way sampled by the curve sweep.
#[derive(Clone, Debug)]
pub struct CurveMatrix {
    ways: usize,
    rows: Vec<Vec<f64>>,
}

impl CurveMatrix {
    /// Parse a whitespace-separated numeric matrix. All rows must have the
    /// same width. Empty input yields an empty matrix.
    pub fn parse(text: &str) -> Result<Self> {
        let mut rows: Vec<Vec<f64>> = Vec::new();
        for line in text.lines() {
            if line.split_whitespace().next().is_none() {
                continue;
            }
            let row = line.split_whitespace()
                .map(|t| t.parse::<f64>().map_err(|_| {
                    Error::DataCorruption(format!(
                        "bad curve value: {:?}", t
                    ))
                }))
                .collect::<Result<Vec<f64>>>()?;
            if let Some(first) = rows.first() {
                if row.len() != first.len() {
                    return Err(Error::DataCorruption(format!(
                        "ragged curve matrix: row of width {} after {}",
                        row.len(), first.len()
                    )));
                }
            }
            rows.push(row);
        }
        let ways = rows.first().map(|r| r.len()).unwrap_or(0);
        Ok(Self { ways, rows })
    }

    pub fn num_ways(&self) -> usize {
        self.ways
    }

    pub fn num_phases(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The per-phase samples at one associativity way (a column slice).
    pub fn way(&self, w: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[w]).collect()
    }

    /// Per-way mean across phases.
    pub fn way_means(&self) -> Vec<f64> {
        (0..self.ways).map(|w| {
            let col = self.way(w);
            col.iter().sum::<f64>() / col.len() as f64
        }).collect()
    }

    /// Per-way maximum across phases.
    pub fn way_maxs(&self) -> Vec<f64> {
        (0..self.ways).map(|w| {
            self.way(w).into_iter()
                .fold(f64::NEG_INFINITY, f64::max)
        }).collect()
    }

    /// Per-way minimum across phases.
    pub fn way_mins(&self) -> Vec<f64> {
        (0..self.ways).map(|w| {
            self.way(w).into_iter()
                .fold(f64::INFINITY, f64::min)
        }).collect()
    }
}
