use core::cmp::Ordering;
use core::fmt;
use core::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MAX_DIM: usize = 4;

/// A tuple of one to four integers naming a task. Names are ordered first by
/// their number of components, then component-wise starting from the last
/// component, which is the most significant. Names of different dimension
/// are never equal.
///
#[derive(Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskName {
    ids: [i32; MAX_DIM],
    dim: u8,
}

impl TaskName {
    pub fn new(ids: &[i32]) -> Result<Self> {
        if ids.is_empty() || ids.len() > MAX_DIM {
            return Err(Error::TaskNameArity(ids.len()));
        }
        let mut name = Self {
            ids: [0; MAX_DIM],
            dim: ids.len() as u8,
        };
        name.ids[..ids.len()].copy_from_slice(ids);
        Ok(name)
    }

    /// The name of the task working on box `index` of a box array.
    ///
    pub fn from_box(index: usize) -> Result<Self> {
        i32::try_from(index)
            .map(Self::from)
            .map_err(|_| Error::BoxIndexOverflow(index))
    }

    pub fn dim(&self) -> usize {
        self.dim as usize
    }

    pub fn ids(&self) -> &[i32] {
        &self.ids[..self.dim()]
    }

    /// Copy the components of another name of the same dimension into this
    /// one.
    ///
    pub fn assign(&mut self, rhs: &Self) -> Result<()> {
        if self.dim != rhs.dim {
            return Err(Error::TaskNameDimension {
                expected: self.dim(),
                found: rhs.dim(),
            });
        }
        self.ids = rhs.ids;
        Ok(())
    }
}

impl Ord for TaskName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dim.cmp(&other.dim).then_with(|| {
            self.ids()
                .iter()
                .rev()
                .cmp(other.ids().iter().rev())
        })
    }
}

impl PartialOrd for TaskName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Index<usize> for TaskName {
    type Output = i32;

    fn index(&self, i: usize) -> &i32 {
        &self.ids()[i]
    }
}

impl IndexMut<usize> for TaskName {
    fn index_mut(&mut self, i: usize) -> &mut i32 {
        let dim = self.dim();
        &mut self.ids[..dim][i]
    }
}

impl From<i32> for TaskName {
    fn from(id: i32) -> Self {
        Self {
            ids: [id, 0, 0, 0],
            dim: 1,
        }
    }
}

impl From<(i32, i32)> for TaskName {
    fn from((a, b): (i32, i32)) -> Self {
        Self {
            ids: [a, b, 0, 0],
            dim: 2,
        }
    }
}

impl From<(i32, i32, i32)> for TaskName {
    fn from((a, b, c): (i32, i32, i32)) -> Self {
        Self {
            ids: [a, b, c, 0],
            dim: 3,
        }
    }
}

impl From<(i32, i32, i32, i32)> for TaskName {
    fn from((a, b, c, d): (i32, i32, i32, i32)) -> Self {
        Self {
            ids: [a, b, c, d],
            dim: 4,
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (n, id) in self.ids().iter().enumerate() {
            if n > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", id)?;
        }
        write!(f, ")")
    }
}

impl fmt::Debug for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskName{}", self)
    }
}
