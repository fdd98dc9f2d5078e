use glam::DVec3;

use super::Coord;
use crate::error::{Error, Result};

/// Linear index-to-world map: `world = index * scale + translation`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    scale: DVec3,
    translation: DVec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            scale: DVec3::ONE,
            translation: DVec3::ZERO,
        }
    }
}

impl Transform {
    pub fn new(voxel_size: f64) -> Result<Self> {
        Self::with_scale(DVec3::splat(voxel_size))
    }
    pub fn with_scale(scale: DVec3) -> Result<Self> {
        if !scale.is_finite() || scale.min_element() <= 0.0 {
            return Err(Error::value(format!(
                "voxel size must be positive and finite, got {scale}"
            )));
        }
        Ok(Self {
            scale,
            translation: DVec3::ZERO,
        })
    }
    pub fn translated(mut self, translation: DVec3) -> Self {
        self.translation += translation;
        self
    }
    pub fn voxel_size(&self) -> DVec3 {
        self.scale
    }
    pub fn translation(&self) -> DVec3 {
        self.translation
    }
    pub fn is_uniform(&self) -> bool {
        self.scale.x == self.scale.y && self.scale.y == self.scale.z
    }
    /// Edge length of a cubic voxel; fails when the voxels are not cubes.
    pub fn uniform_voxel_size(&self) -> Result<f64> {
        if self.is_uniform() {
            Ok(self.scale.x)
        } else {
            Err(Error::value(format!(
                "operation requires uniform voxels, got {}",
                self.scale
            )))
        }
    }
    pub fn index_to_world(&self, ijk: DVec3) -> DVec3 {
        ijk * self.scale + self.translation
    }
    pub fn coord_to_world(&self, ijk: Coord) -> DVec3 {
        self.index_to_world(ijk.as_dvec3())
    }
    pub fn world_to_index(&self, xyz: DVec3) -> DVec3 {
        (xyz - self.translation) / self.scale
    }
    pub fn world_to_index_node_centered(&self, xyz: DVec3) -> Coord {
        Coord::round(self.world_to_index(xyz))
    }
    pub fn world_to_index_cell_centered(&self, xyz: DVec3) -> Coord {
        Coord::floor(self.world_to_index(xyz))
    }
}
