use crate::box_array::BoxArray;
use crate::distribution::DistributionMapping;
use crate::error::{Error, Result};
use crate::index_space::IndexSpace;

/// One value per box owned by a given rank: per-box costs, field data, or
/// anything else that lives next to a box. Values are addressed by their
/// global box index.
///
#[derive(Clone, Debug)]
pub struct LayoutData<T> {
    boxes: BoxArray,
    dm: DistributionMapping,
    rank: usize,
    indices: Vec<usize>,
    data: Vec<T>,
}

impl<T> LayoutData<T> {
    /// Create the data for each box owned by `rank`, from a function of the
    /// box index and the box.
    ///
    pub fn new<F>(boxes: &BoxArray, dm: &DistributionMapping, rank: usize, mut f: F) -> Result<Self>
    where
        F: FnMut(usize, &IndexSpace) -> T,
    {
        Self::try_new(boxes, dm, rank, |i, b| Ok(f(i, b)))
    }

    /// Like [`LayoutData::new`], for a fallible constructor.
    ///
    pub fn try_new<F>(boxes: &BoxArray, dm: &DistributionMapping, rank: usize, mut f: F) -> Result<Self>
    where
        F: FnMut(usize, &IndexSpace) -> Result<T>,
    {
        if boxes.len() != dm.len() {
            return Err(Error::LayoutMismatch {
                boxes: boxes.len(),
                owners: dm.len(),
            });
        }
        let indices = dm.local_indices(rank);
        let data = indices
            .iter()
            .map(|&i| f(i, &boxes.as_slice()[i]))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            boxes: boxes.clone(),
            dm: dm.clone(),
            rank,
            indices,
            data,
        })
    }

    pub fn box_array(&self) -> &BoxArray {
        &self.boxes
    }

    pub fn distribution_map(&self) -> &DistributionMapping {
        &self.dm
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of boxes owned by this rank.
    ///
    pub fn local_len(&self) -> usize {
        self.data.len()
    }

    /// Global indexes of the local boxes, ascending.
    ///
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn get(&self, box_index: usize) -> Option<&T> {
        self.local(box_index).map(|n| &self.data[n])
    }

    pub fn get_mut(&mut self, box_index: usize) -> Option<&mut T> {
        self.local(box_index).map(move |n| &mut self.data[n])
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        self.indices.iter().copied().zip(self.data.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> + '_ {
        self.indices.iter().copied().zip(self.data.iter_mut())
    }

    pub fn into_vec(self) -> Vec<(usize, T)> {
        self.indices.into_iter().zip(self.data).collect()
    }

    fn local(&self, box_index: usize) -> Option<usize> {
        self.indices.binary_search(&box_index).ok()
    }
}
