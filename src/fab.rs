use crate::error::{Error, Result};
use crate::index_space::{IndexSpace, IntVect};




/**
 * A fab ("array box") is a mapping from a rectangular region of the index
 * space to field values. It covers a valid box plus a layer of ghost cells
 * on every side; the ghost layer holds copies of neighboring data and is
 * refreshed by halo exchange. The backing array is row-major over the cells,
 * with the `ncomp` components of each cell stored contiguously.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct Fab {
    valid: IndexSpace,
    space: IndexSpace,
    ncomp: usize,
    data: Vec<f64>,
}




// ============================================================================
impl Fab {


    /**
     * Generate a fab covering `valid` with `ghost` layers of ghost cells,
     * with values defined from a closure of the index and the component.
     * Ghost cells are initialized from the closure too.
     */
    pub fn from_function<F>(valid: IndexSpace, ghost: i64, ncomp: usize, f: F) -> Self
    where
        F: Fn(IntVect, usize) -> f64,
    {
        let space = valid.grow(ghost);
        Self {
            valid,
            space,
            ncomp,
            data: space.iter().flat_map(|i| (0..ncomp).map(move |c| (i, c))).map(|(i, c)| f(i, c)).collect(),
        }
    }


    pub fn zeros(valid: IndexSpace, ghost: i64, ncomp: usize) -> Self {
        Self::from_function(valid, ghost, ncomp, |_, _| 0.0)
    }


    /**
     * Return the box of cells this fab owns.
     */
    pub fn valid(&self) -> IndexSpace {
        self.valid
    }


    /**
     * Return the box of cells this fab stores, ghosts included.
     */
    pub fn space(&self) -> IndexSpace {
        self.space
    }


    pub fn ghost(&self) -> i64 {
        self.valid.lo()[0] - self.space.lo()[0]
    }


    pub fn ncomp(&self) -> usize {
        self.ncomp
    }


    pub fn data(&self) -> &[f64] {
        &self.data
    }


    /**
     * Return the components at the given index. Panics if the index is
     * outside the stored region.
     */
    pub fn get_slice(&self, index: IntVect) -> &[f64] {
        let start = self.offset(index);
        &self.data[start..start + self.ncomp]
    }


    pub fn get_slice_mut(&mut self, index: IntVect) -> &mut [f64] {
        let start = self.offset(index);
        &mut self.data[start..start + self.ncomp]
    }


    pub fn get(&self, index: IntVect, comp: usize) -> f64 {
        self.get_slice(index)[comp]
    }


    pub fn set(&mut self, index: IntVect, comp: usize, value: f64) {
        self.get_slice_mut(index)[comp] = value
    }


    /**
     * Serialize the values in `region`, which must lie inside the stored
     * region, in row-major order as little-endian f64.
     */
    pub fn region_to_bytes(&self, region: &IndexSpace) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(region.len() * self.ncomp * 8);
        for index in region {
            for x in self.get_slice(index) {
                bytes.extend_from_slice(&x.to_le_bytes())
            }
        }
        bytes
    }


    /**
     * Overwrite the values in `region` from a buffer produced by
     * [`Fab::region_to_bytes`] on a fab with the same number of components.
     */
    pub fn fill_from_bytes(&mut self, region: &IndexSpace, bytes: &[u8]) -> Result<()> {
        let expected = region.len() * self.ncomp * 8;

        if bytes.len() != expected {
            return Err(Error::BufferLength { expected, found: bytes.len() });
        }
        let mut values = bytes.chunks_exact(8).map(|chunk| {
            let mut word = [0; 8];
            word.copy_from_slice(chunk);
            f64::from_le_bytes(word)
        });
        for index in region {
            for x in self.get_slice_mut(index) {
                if let Some(value) = values.next() {
                    *x = value
                }
            }
        }
        Ok(())
    }


    fn offset(&self, index: IntVect) -> usize {
        if !self.space.contains(index) {
            panic!("index {:?} out of range on fab {:?}", index, self.space);
        }
        self.space.row_major_offset(index) * self.ncomp
    }
}




// ============================================================================
#[cfg(test)]
#[cfg(not(feature = "dim3"))]
mod test {

    use super::Fab;
    use crate::error::Error;
    use crate::index_space::IndexSpace;

    #[test]
    fn fab_covers_ghost_cells() {
        let fab = Fab::from_function(IndexSpace::new([0, 0], [3, 3]), 1, 2, |[i, j], c| {
            (i * 10 + j) as f64 + c as f64 * 0.5
        });
        assert_eq!(fab.space(), IndexSpace::new([-1, -1], [4, 4]));
        assert_eq!(fab.ghost(), 1);
        assert_eq!(fab.data().len(), 36 * 2);
        assert_eq!(fab.get([2, 3], 0), 23.0);
        assert_eq!(fab.get_slice([-1, 4]), &[-6.0, -5.5]);
    }

    #[test]
    fn region_copies_between_fabs() {
        let src = Fab::from_function(IndexSpace::new([0, 0], [3, 3]), 0, 1, |[i, j], _| (i * 4 + j) as f64);
        let mut dst = Fab::zeros(IndexSpace::new([4, 0], [7, 3]), 1, 1);
        let region = IndexSpace::new([3, 0], [3, 3]);

        dst.fill_from_bytes(&region, &src.region_to_bytes(&region)).unwrap();
        assert_eq!(dst.get([3, 2], 0), 14.0);
        assert_eq!(dst.get([4, 2], 0), 0.0);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut fab = Fab::zeros(IndexSpace::new([0, 0], [1, 1]), 0, 1);
        let result = fab.fill_from_bytes(&IndexSpace::new([0, 0], [1, 1]), &[0; 8]);
        assert!(matches!(result, Err(Error::BufferLength { expected: 32, found: 8 })));
    }

    #[test]
    #[should_panic]
    fn access_outside_the_fab_panics() {
        Fab::zeros(IndexSpace::new([0, 0], [1, 1]), 0, 1).get([2, 0], 0);
    }
}
