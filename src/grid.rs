use crate::error::{Error, Result};
use crate::math::Transform;
use crate::tree::Tree;
use crate::value::GridValue;

/// Semantic class of the values a grid stores. Some tools only accept one class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GridClass {
    #[default]
    Unknown,
    /// Narrow-band signed distances, negative inside.
    LevelSet,
    /// Densities in `[0, 1]`, zero outside.
    FogVolume,
}

/// A tree together with its index-to-world transform, class and name.
#[derive(Clone, Debug)]
pub struct Grid<T> {
    tree: Tree<T>,
    transform: Transform,
    class: GridClass,
    name: String,
}

impl<T: GridValue> Grid<T> {
    pub fn new(background: T) -> Self {
        Self::from_tree(Tree::new(background))
    }
    pub fn from_tree(tree: Tree<T>) -> Self {
        Self {
            tree,
            transform: Transform::default(),
            class: GridClass::Unknown,
            name: String::new(),
        }
    }
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }
    pub fn with_class(mut self, class: GridClass) -> Self {
        self.class = class;
        self
    }
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn tree(&self) -> &Tree<T> {
        &self.tree
    }
    pub fn tree_mut(&mut self) -> &mut Tree<T> {
        &mut self.tree
    }
    pub fn into_tree(self) -> Tree<T> {
        self.tree
    }
    pub fn background(&self) -> T {
        self.tree.background()
    }
    pub fn transform(&self) -> &Transform {
        &self.transform
    }
    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }
    pub fn class(&self) -> GridClass {
        self.class
    }
    pub fn set_class(&mut self, class: GridClass) {
        self.class = class;
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }
    pub fn active_voxel_count(&self) -> u64 {
        self.tree.active_voxel_count()
    }

    pub(crate) fn require_level_set(&self, operation: &str) -> Result<()> {
        if self.class == GridClass::LevelSet {
            Ok(())
        } else {
            Err(Error::type_mismatch(format!(
                "{operation} requires a level set grid, got {:?} grid '{}'",
                self.class, self.name
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Coord;

    #[test]
    fn builder_sets_metadata() {
        let mut grid = Grid::new(3.0f32)
            .with_class(GridClass::LevelSet)
            .with_name("sphere")
            .with_transform(Transform::new(0.5).unwrap());
        grid.tree_mut().set_value(Coord::ZERO, -1.0);
        assert_eq!(grid.background(), 3.0);
        assert_eq!(grid.name(), "sphere");
        assert_eq!(grid.transform().uniform_voxel_size().unwrap(), 0.5);
        assert_eq!(grid.active_voxel_count(), 1);
        assert!(grid.require_level_set("genus").is_ok());
    }

    #[test]
    fn class_check_names_the_operation() {
        let grid = Grid::new(0.0f32).with_name("density");
        let err = grid.require_level_set("euler characteristic").unwrap_err();
        assert!(matches!(err, Error::Type(_)));
        assert!(err.to_string().contains("euler characteristic"));
    }
}
