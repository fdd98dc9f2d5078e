//! In-memory archive of a tree.
//!
//! The record is built from value and leaf iteration alone and restored through the
//! ordinary write path, so it round-trips whatever the tree's internal layout is.

use bincode::{Decode, Encode};
use tracing::{debug, debug_span};

use crate::error::{Error, Result};
use crate::math::{Coord, CoordBBox};
use crate::tree::{LeafMask, LeafNode, LowerNode, Node, Tree, UpperNode, ValueFilter};
use crate::value::GridValue;

const ARCHIVE_VERSION: u32 = 1;

#[derive(Encode, Decode)]
struct TreeRecord<T> {
    version: u32,
    background: T,
    tiles: Vec<TileRecord<T>>,
    leaves: Vec<LeafRecord<T>>,
}

#[derive(Encode, Decode)]
struct TileRecord<T> {
    level: u8,
    origin: Coord,
    value: T,
    active: bool,
}

#[derive(Encode, Decode)]
struct LeafRecord<T> {
    origin: Coord,
    mask: Vec<u64>,
    values: Vec<T>,
}

fn tile_dim<T: GridValue>(level: u8) -> Option<i32> {
    match level {
        1 => Some(<LeafNode<T> as Node<T>>::DIM),
        2 => Some(<LowerNode<T> as Node<T>>::DIM),
        3 => Some(<UpperNode<T> as Node<T>>::DIM),
        _ => None,
    }
}

/// Encodes the background, every tile that differs from an untouched region and every leaf.
pub fn to_bytes<T>(tree: &Tree<T>) -> Result<Vec<u8>>
where
    T: GridValue + Encode,
{
    let _span = debug_span!("archive_encode").entered();
    let background = tree.background();
    let tiles: Vec<TileRecord<T>> = tree
        .iter_values(ValueFilter::All)
        .tiles_only()
        .filter(|t| t.is_active() || t.value() != background)
        .map(|t| TileRecord {
            level: t.level() as u8,
            origin: t.coord(),
            value: t.value(),
            active: t.is_active(),
        })
        .collect();
    let leaves: Vec<LeafRecord<T>> = tree
        .leaves()
        .map(|leaf| LeafRecord {
            origin: leaf.origin(),
            mask: leaf.mask().words().to_vec(),
            values: leaf.values().to_vec(),
        })
        .collect();
    let record = TreeRecord {
        version: ARCHIVE_VERSION,
        background,
        tiles,
        leaves,
    };
    let bytes = bincode::encode_to_vec(&record, bincode::config::standard())?;
    debug!(tiles = record.tiles.len(), leaves = record.leaves.len(), bytes = bytes.len(), "tree encoded");
    Ok(bytes)
}

/// Rebuilds a tree written by [`to_bytes`].
pub fn from_bytes<T>(bytes: &[u8]) -> Result<Tree<T>>
where
    T: GridValue + Decode<()>,
{
    let _span = debug_span!("archive_decode", bytes = bytes.len()).entered();
    let (record, _): (TreeRecord<T>, usize) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
    if record.version != ARCHIVE_VERSION {
        return Err(Error::value(format!(
            "unsupported archive version {}, expected {ARCHIVE_VERSION}",
            record.version
        )));
    }
    let mut tree = Tree::new(record.background);
    for tile in &record.tiles {
        let dim = tile_dim::<T>(tile.level)
            .ok_or_else(|| Error::value(format!("tile at {:?} has invalid level {}", tile.origin, tile.level)))?;
        tree.fill(&CoordBBox::create_cube(tile.origin, dim), tile.value, tile.active);
    }
    let leaf_count = record.leaves.len();
    for leaf in record.leaves {
        if leaf.origin != leaf.origin.aligned(<LeafNode<T> as Node<T>>::TOTAL) {
            return Err(Error::value(format!("leaf origin {:?} is not leaf-aligned", leaf.origin)));
        }
        let words: [u64; 8] = leaf
            .mask
            .try_into()
            .map_err(|_| Error::value(format!("leaf at {:?} has a malformed mask", leaf.origin)))?;
        let node = LeafNode::from_parts(leaf.origin, LeafMask::from_words(words), leaf.values)
            .ok_or_else(|| Error::value(format!("leaf at {:?} has the wrong number of values", leaf.origin)))?;
        tree.add_leaf(node);
    }
    debug!(tiles = record.tiles.len(), leaves = leaf_count, "tree decoded");
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tree<f32> {
        let mut tree = Tree::new(0.5f32);
        tree.set_value(Coord::new(-3, 7, 1000), 2.0);
        tree.set_value_off(Coord::new(1, 2, 3), -1.0);
        tree.fill(&CoordBBox::create_cube(Coord::new(128, 0, 0), 128), 4.0, true);
        tree.fill(&CoordBBox::create_cube(Coord::new(8, 8, 8), 8), 6.0, false);
        tree.fill(&CoordBBox::create_cube(Coord::splat(-4096), 4096), -2.0, true);
        tree
    }

    fn items(tree: &Tree<f32>) -> Vec<(Coord, f32, bool, usize)> {
        tree.iter_values(ValueFilter::All)
            .filter(|i| i.is_active() || i.value() != tree.background())
            .map(|i| (i.coord(), i.value(), i.is_active(), i.level()))
            .collect()
    }

    #[test]
    fn round_trip_preserves_values_and_tiles() {
        let tree = sample();
        let bytes = to_bytes(&tree).unwrap();
        let back: Tree<f32> = from_bytes(&bytes).unwrap();

        assert_eq!(back.background(), 0.5);
        assert_eq!(back.leaf_count(), tree.leaf_count());
        assert_eq!(back.active_tile_count(), tree.active_tile_count());
        assert_eq!(back.active_voxel_count(), tree.active_voxel_count());
        assert_eq!(items(&back), items(&tree));
        assert_eq!(back.probe_value(Coord::new(1, 2, 3)), (-1.0, false));
        assert_eq!(back.probe_value(Coord::new(-1, -1, -1)), (-2.0, true));
        assert_eq!(back.probe_value(Coord::new(9, 9, 9)), (6.0, false));
    }

    #[test]
    fn bool_trees_round_trip() {
        let mut tree = Tree::new(false);
        tree.set_value(Coord::new(5, 5, 5), true);
        tree.fill(&CoordBBox::create_cube(Coord::new(64, 64, 64), 8), true, true);
        let back: Tree<bool> = from_bytes(&to_bytes(&tree).unwrap()).unwrap();
        assert_eq!(back.active_voxel_count(), 513);
        assert!(back.value(Coord::new(5, 5, 5)));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(from_bytes::<f32>(&[1, 2]), Err(Error::Decode(_))));
        let mut bytes = to_bytes(&Tree::new(1.0f32)).unwrap();
        bytes[0] = 9;
        assert!(matches!(from_bytes::<f32>(&bytes), Err(Error::Value(_))));
    }

    #[test]
    fn misaligned_leaf_is_rejected() {
        let mut record = TreeRecord {
            version: ARCHIVE_VERSION,
            background: 0.0f32,
            tiles: Vec::new(),
            leaves: vec![LeafRecord {
                origin: Coord::new(8, 0, 16),
                mask: vec![1, 0, 0, 0, 0, 0, 0, 0],
                values: vec![1.0; 512],
            }],
        };
        let bytes = bincode::encode_to_vec(&record, bincode::config::standard()).unwrap();
        let back: Tree<f32> = from_bytes(&bytes).unwrap();
        assert_eq!(back.probe_value(Coord::new(8, 0, 16)), (1.0, true));

        record.leaves[0].origin = Coord::new(3, 0, 16);
        let bytes = bincode::encode_to_vec(&record, bincode::config::standard()).unwrap();
        let err = from_bytes::<f32>(&bytes).err();
        assert!(matches!(err, Some(Error::Value(m)) if m.contains("leaf-aligned")));
    }
}
