//! Smoothing filters over the active voxels of a tree.
//!
//! Every pass reads the tree as it was before the pass and writes fresh leaf buffers,
//! so the result does not depend on the grain size. Active tiles are left alone.

use std::cmp::Ordering;

use tracing::{debug, debug_span, trace};

use crate::error::{Error, Result};
use crate::math::{Coord, smooth_unit_step};
use crate::parallel::{self, CancelToken, Completion, DEFAULT_GRAIN_SIZE, was_cancelled};
use crate::tree::{LeafNode, Tree, ValueAccessor};
use crate::value::RealValue;

#[derive(Clone, Debug)]
pub struct FilterConfig {
    pub grain_size: usize,
    /// Mask values at or below this give zero alpha.
    pub min_mask: f64,
    /// Mask values at or above this give full alpha.
    pub max_mask: f64,
    pub invert_mask: bool,
    pub cancel: Option<CancelToken>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            grain_size: DEFAULT_GRAIN_SIZE,
            min_mask: 0.0,
            max_mask: 1.0,
            invert_mask: false,
            cancel: None,
        }
    }
}

impl FilterConfig {
    pub fn set_mask_range(&mut self, min: f64, max: f64) -> Result<()> {
        if !(min < max) {
            return Err(Error::value(format!("invalid mask range [{min}, {max}]")));
        }
        self.min_mask = min;
        self.max_mask = max;
        Ok(())
    }
    pub fn with_grain_size(mut self, grain_size: usize) -> Self {
        self.grain_size = grain_size;
        self
    }
    pub fn with_invert_mask(mut self, invert: bool) -> Self {
        self.invert_mask = invert;
        self
    }
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn alpha(&self, mask: f64) -> f64 {
        let a = smooth_unit_step((mask - self.min_mask) / (self.max_mask - self.min_mask));
        if self.invert_mask { 1.0 - a } else { a }
    }
}

/// Filters the active leaf voxels of a tree in place.
///
/// An optional alpha mask blends each filtered value with the old one:
/// `(1 - alpha) * old + alpha * filtered`, where alpha comes from the mask value at
/// the same coordinate mapped through [`FilterConfig::min_mask`]..[`FilterConfig::max_mask`].
pub struct Filter<'a, T> {
    tree: &'a mut Tree<T>,
    config: FilterConfig,
}

impl<'a, T: RealValue> Filter<'a, T> {
    pub fn new(tree: &'a mut Tree<T>) -> Self {
        Self::with_config(tree, FilterConfig::default())
    }
    pub fn with_config(tree: &'a mut Tree<T>, config: FilterConfig) -> Self {
        Self { tree, config }
    }
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
    pub fn config_mut(&mut self) -> &mut FilterConfig {
        &mut self.config
    }

    /// Box filter of `2 * width + 1` values per axis, applied as three axis passes.
    pub fn mean(&mut self, width: usize, iterations: usize, mask: Option<&Tree<f32>>) -> Completion {
        let _span = debug_span!("mean_filter", width, iterations).entered();
        for iteration in 0..iterations {
            if self.box_passes(width, mask) == Completion::Cancelled {
                debug!(iteration, "mean filter cancelled");
                return Completion::Cancelled;
            }
            trace!(iteration, "mean iteration done");
        }
        self.finish("mean filter")
    }

    /// Approximates a gaussian with four successive box filters per iteration.
    pub fn gaussian(&mut self, width: usize, iterations: usize, mask: Option<&Tree<f32>>) -> Completion {
        let _span = debug_span!("gaussian_filter", width, iterations).entered();
        for iteration in 0..iterations {
            for _ in 0..4 {
                if self.box_passes(width, mask) == Completion::Cancelled {
                    debug!(iteration, "gaussian filter cancelled");
                    return Completion::Cancelled;
                }
            }
            trace!(iteration, "gaussian iteration done");
        }
        self.finish("gaussian filter")
    }

    /// Replaces each active voxel with the median of its `(2 * width + 1)^3` neighbourhood.
    pub fn median(&mut self, width: usize, iterations: usize, mask: Option<&Tree<f32>>) -> Completion {
        let _span = debug_span!("median_filter", width, iterations).entered();
        let w = width as i32;
        for iteration in 0..iterations {
            if was_cancelled(self.config.cancel.as_ref()) {
                debug!(iteration, "median filter cancelled");
                return Completion::Cancelled;
            }
            self.pass(mask, |acc, xyz| {
                let mut window = Vec::with_capacity((2 * width + 1).pow(3));
                for dx in -w..=w {
                    for dy in -w..=w {
                        for dz in -w..=w {
                            window.push(acc.value(xyz + Coord::new(dx, dy, dz)));
                        }
                    }
                }
                let mid = window.len() / 2;
                let (_, median, _) =
                    window.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
                *median
            });
            trace!(iteration, "median iteration done");
        }
        self.finish("median filter")
    }

    /// Adds `value` to every active voxel.
    pub fn offset(&mut self, value: T, mask: Option<&Tree<f32>>) -> Completion {
        let _span = debug_span!("offset_filter", ?value).entered();
        if was_cancelled(self.config.cancel.as_ref()) {
            debug!("offset cancelled");
            return Completion::Cancelled;
        }
        self.pass(mask, |acc, xyz| acc.value(xyz).plus(value));
        self.finish("offset")
    }

    fn finish(&mut self, what: &str) -> Completion {
        debug!(active = self.tree.active_voxel_count(), leaves = self.tree.leaf_count(), "{what} finished");
        Completion::Finished
    }

    fn box_passes(&mut self, width: usize, mask: Option<&Tree<f32>>) -> Completion {
        let w = width as i32;
        let scale = 1.0 / (2 * width + 1) as f64;
        for axis in 0..3 {
            if was_cancelled(self.config.cancel.as_ref()) {
                return Completion::Cancelled;
            }
            self.pass(mask, |acc, xyz| {
                let mut step = Coord::ZERO;
                let mut sum = T::zero();
                for d in -w..=w {
                    step[axis] = d;
                    sum = sum.plus(acc.value(xyz + step));
                }
                sum.scaled(scale)
            });
        }
        Completion::Finished
    }

    /// One frozen-read pass: computes new buffers for every leaf, then swaps them in.
    fn pass<F>(&mut self, mask: Option<&Tree<f32>>, op: F)
    where
        F: Fn(&ValueAccessor<'_, T>, Coord) -> T + Sync,
    {
        let config = &self.config;
        let mut buffers = {
            let tree: &Tree<T> = self.tree;
            let leaves: Vec<&LeafNode<T>> = tree.leaves().collect();
            parallel::map(&leaves, config.grain_size, |_, leaf| {
                let acc = tree.accessor();
                let alpha_acc = mask.map(|m| m.accessor());
                let mut out = leaf.values().to_vec();
                for (n, slot) in out.iter_mut().enumerate() {
                    if !leaf.is_on_at(n) {
                        continue;
                    }
                    let xyz = leaf.offset_to_global_coord(n);
                    let alpha = alpha_acc
                        .as_ref()
                        .map_or(1.0, |m| config.alpha(f64::from(m.value(xyz))));
                    if alpha <= 0.0 {
                        continue;
                    }
                    let filtered = op(&acc, xyz);
                    *slot = if alpha >= 1.0 {
                        filtered
                    } else {
                        slot.scaled(1.0 - alpha).plus(filtered.scaled(alpha))
                    };
                }
                out
            })
        };
        let grain_size = self.config.grain_size;
        self.tree.leaf_manager().swap_buffers(&mut buffers, grain_size);
    }
}
