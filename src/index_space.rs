use serde::{Deserialize, Serialize};




/// Number of spatial dimensions. Chosen at build time: 2 by default, 3 with
/// the `dim3` feature.
#[cfg(not(feature = "dim3"))]
pub const SPACE_DIM: usize = 2;

#[cfg(feature = "dim3")]
pub const SPACE_DIM: usize = 3;




/// A point (or extent) in the discrete index space.
pub type IntVect = [i64; SPACE_DIM];




/**
 * Represents a rectangular region in a discrete index space. The bounds are
 * inclusive on both ends: a box with `lo == hi` holds exactly one cell. Boxes
 * are immutable values; every operation returns a new one.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpace {
    lo: IntVect,
    hi: IntVect,
}




// ============================================================================
impl IndexSpace {


    pub fn new(lo: IntVect, hi: IntVect) -> Self {

        assert!(
            (0..SPACE_DIM).all(|a| lo[a] <= hi[a]),
            "index space has negative volume: {:?} .. {:?}", lo, hi);

        Self { lo, hi }
    }


    /**
     * Return the single-cell box at the given index.
     */
    pub fn unit(index: IntVect) -> Self {
        Self::new(index, index)
    }


    /**
     * Return the minimum index (inclusive).
     */
    pub fn lo(&self) -> IntVect {
        self.lo
    }


    /**
     * Return the maximum index (inclusive).
     */
    pub fn hi(&self) -> IntVect {
        self.hi
    }


    /**
     * Return the number of indexes on each axis.
     */
    pub fn shape(&self) -> [usize; SPACE_DIM] {
        let mut shape = [0; SPACE_DIM];
        for a in 0..SPACE_DIM {
            shape[a] = (self.hi[a] - self.lo[a] + 1) as usize;
        }
        shape
    }


    /**
     * Return the number of cells in this index space.
     */
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }


    /**
     * An index space always holds at least one cell.
     */
    pub fn is_empty(&self) -> bool {
        false
    }


    /**
     * Determine whether this index space contains the given index.
     */
    pub fn contains(&self, index: IntVect) -> bool {
        (0..SPACE_DIM).all(|a| self.lo[a] <= index[a] && index[a] <= self.hi[a])
    }


    /**
     * Determine whether another index space is a subset of this one.
     */
    pub fn contains_space(&self, other: &Self) -> bool {
        self.contains(other.lo) && self.contains(other.hi)
    }


    /**
     * Return the overlap of two index spaces, or `None` if they are
     * disjoint.
     */
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let mut lo = [0; SPACE_DIM];
        let mut hi = [0; SPACE_DIM];
        for a in 0..SPACE_DIM {
            lo[a] = self.lo[a].max(other.lo[a]);
            hi[a] = self.hi[a].min(other.hi[a]);
            if lo[a] > hi[a] {
                return None;
            }
        }
        Some(Self { lo, hi })
    }


    pub fn intersects(&self, other: &Self) -> bool {
        self.intersect(other).is_some()
    }


    /**
     * Expand this index space by the given number of cells on each side of
     * every axis. This is how a valid region becomes a region with ghost
     * cells.
     */
    pub fn grow(&self, delta: i64) -> Self {
        let mut lo = self.lo;
        let mut hi = self.hi;
        for a in 0..SPACE_DIM {
            lo[a] -= delta;
            hi[a] += delta;
        }
        Self::new(lo, hi)
    }


    /**
     * Trim this index space by the given number of cells on each side.
     */
    pub fn shrink(&self, delta: i64) -> Self {
        self.grow(-delta)
    }


    /**
     * Map this index space onto a grid refined by the given ratio.
     */
    pub fn refine(&self, ratio: i64) -> Self {
        let mut lo = self.lo;
        let mut hi = self.hi;
        for a in 0..SPACE_DIM {
            lo[a] *= ratio;
            hi[a] = (hi[a] + 1) * ratio - 1;
        }
        Self::new(lo, hi)
    }


    /**
     * Map this index space onto a grid coarsened by the given ratio. Cells
     * partially covered on the coarse grid are included.
     */
    pub fn coarsen(&self, ratio: i64) -> Self {
        let mut lo = self.lo;
        let mut hi = self.hi;
        for a in 0..SPACE_DIM {
            lo[a] = lo[a].div_euclid(ratio);
            hi[a] = hi[a].div_euclid(ratio);
        }
        Self::new(lo, hi)
    }


    /**
     * Return the geometric center of the box, in index units.
     */
    pub fn centroid(&self) -> [f64; SPACE_DIM] {
        let mut c = [0.0; SPACE_DIM];
        for a in 0..SPACE_DIM {
            c[a] = 0.5 * (self.lo[a] + self.hi[a]) as f64;
        }
        c
    }


    /**
     * Return the linear offset for the given index, in a row-major memory
     * buffer aligned with the start of this index space.
     */
    pub fn row_major_offset(&self, index: IntVect) -> usize {
        let shape = self.shape();
        let mut offset = 0;
        for a in 0..SPACE_DIM {
            offset = offset * shape[a] + (index[a] - self.lo[a]) as usize;
        }
        offset
    }


    /**
     * Split this index space into boxes no longer than `max_size` on any
     * axis. The pieces are returned in row-major order of their position.
     */
    pub fn chop(&self, max_size: usize) -> Vec<Self> {
        assert!(max_size > 0, "chop size must be positive");

        // Block sizes never exceed the extent, so every count and offset
        // below stays within the box's own i64 range.
        let shape = self.shape();
        let mut size = [0; SPACE_DIM];
        let mut counts = [0; SPACE_DIM];
        for a in 0..SPACE_DIM {
            size[a] = max_size.min(shape[a]);
            counts[a] = shape[a].div_ceil(size[a]);
        }
        let blocks = Self::new([0; SPACE_DIM], {
            let mut hi = [0; SPACE_DIM];
            for a in 0..SPACE_DIM {
                hi[a] = counts[a] as i64 - 1;
            }
            hi
        });
        blocks
            .iter()
            .map(|b| {
                let mut lo = [0; SPACE_DIM];
                let mut hi = [0; SPACE_DIM];
                for a in 0..SPACE_DIM {
                    lo[a] = self.lo[a] + b[a] * size[a] as i64;
                    hi[a] = (lo[a] + size[a] as i64 - 1).min(self.hi[a]);
                }
                Self::new(lo, hi)
            })
            .collect()
    }


    /**
     * Return an iterator which traverses the index space in row-major order
     * (C-like; the final index increases fastest).
     */
    pub fn iter(&self) -> Iter {
        Iter {
            space: *self,
            next: Some(self.lo),
        }
    }
}




// ============================================================================
impl IntoIterator for IndexSpace {
    type Item = IntVect;
    type IntoIter = Iter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for &IndexSpace {
    type Item = IntVect;
    type IntoIter = Iter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}




/**
 * Row-major traversal of the indexes in an [`IndexSpace`].
 */
pub struct Iter {
    space: IndexSpace,
    next: Option<IntVect>,
}

impl Iterator for Iter {
    type Item = IntVect;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        let mut index = current;
        let mut axis = SPACE_DIM;

        self.next = loop {
            if axis == 0 {
                break None;
            }
            axis -= 1;
            if index[axis] < self.space.hi[axis] {
                index[axis] += 1;
                break Some(index);
            }
            index[axis] = self.space.lo[axis];
        };
        Some(current)
    }
}
