//! Whole-tree value and state edits.

use tracing::debug;

use crate::tree::{Tree, ValueFilter};
use crate::value::GridValue;

/// Marks every inactive voxel and tile whose value is within `tolerance` of `value` active.
/// Tiles keep their extent; nothing is voxelized.
#[tracing::instrument(skip_all, level = "debug")]
pub fn activate<T: GridValue>(tree: &mut Tree<T>, value: T, tolerance: T) {
    let mut changed = 0u64;
    tree.for_each_value_mut(ValueFilter::Off, |item| {
        if item.value().is_approx_equal(&value, &tolerance) {
            item.set_active(true);
            changed += item.voxel_count();
        }
    });
    debug!(changed, "activated");
}

/// Marks every active voxel and tile whose value is within `tolerance` of `value` inactive.
#[tracing::instrument(skip_all, level = "debug")]
pub fn deactivate<T: GridValue>(tree: &mut Tree<T>, value: T, tolerance: T) {
    let mut changed = 0u64;
    tree.for_each_value_mut(ValueFilter::On, |item| {
        if item.value().is_approx_equal(&value, &tolerance) {
            item.set_active(false);
            changed += item.voxel_count();
        }
    });
    debug!(changed, "deactivated");
}

/// Replaces the background and rewrites every inactive value that equals the old one,
/// so untouched regions and explicitly stored background values stay consistent.
#[tracing::instrument(skip_all, level = "debug")]
pub fn change_background<T: GridValue>(tree: &mut Tree<T>, background: T) {
    let old = tree.background();
    tree.for_each_value_mut(ValueFilter::Off, |item| {
        if item.value() == old {
            item.set_value(background);
        }
    });
    tree.set_background(background);
}
