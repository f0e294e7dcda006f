use std::ops::{Add, AddAssign, Index, IndexMut, Sub, SubAssign};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

type Vector = SmallVec<[i64; 2]>;

/// Component-wise load vector. Most problems use one or two capacity
/// dimensions, so components live inline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Amount(Vector);

impl Amount {
    pub const EMPTY: Amount = Amount(Vector::new_const());

    pub fn empty() -> Self {
        Self::EMPTY
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        let mut vec = SmallVec::with_capacity(dimensions);
        vec.resize(dimensions, 0);
        Amount(vec)
    }

    pub fn from_vec(vec: Vec<i64>) -> Self {
        Amount(SmallVec::from_vec(vec))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty() || self.0.iter().all(|&v| v == 0)
    }

    #[inline]
    pub fn get(&self, index: usize) -> i64 {
        self.0.get(index).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.0.iter().copied()
    }

    pub fn reset(&mut self) {
        self.0.fill(0);
    }

    pub fn update(&mut self, other: &Amount) {
        self.0.clone_from(&other.0);
    }

    pub fn update_max(&mut self, other: &Amount) {
        let max_len = self.len().max(other.len());
        self.0.resize(max_len, 0);
        for i in 0..max_len {
            self.0[i] = self.0[i].max(other.get(i));
        }
    }

    pub fn update_min(&mut self, other: &Amount) {
        let max_len = self.len().max(other.len());
        self.0.resize(max_len, 0);
        for i in 0..max_len {
            self.0[i] = self.0[i].min(other.get(i));
        }
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Index<usize> for Amount {
    type Output = i64;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl IndexMut<usize> for Amount {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        if index >= self.0.len() {
            self.0.resize(index + 1, 0);
        }

        &mut self.0[index]
    }
}

impl AddAssign<&Amount> for Amount {
    fn add_assign(&mut self, rhs: &Amount) {
        if self.0.len() < rhs.len() {
            self.0.resize(rhs.len(), 0);
        }
        for (a, b) in self.0.iter_mut().zip(rhs.iter()) {
            *a = a.saturating_add(b);
        }
    }
}

impl SubAssign<&Amount> for Amount {
    fn sub_assign(&mut self, rhs: &Amount) {
        if self.0.len() < rhs.len() {
            self.0.resize(rhs.len(), 0);
        }
        for (a, b) in self.0.iter_mut().zip(rhs.iter()) {
            *a = a.saturating_sub(b);
        }
    }
}

impl Add<&Amount> for &Amount {
    type Output = Amount;

    fn add(self, rhs: &Amount) -> Amount {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl Sub<&Amount> for &Amount {
    type Output = Amount;

    fn sub(self, rhs: &Amount) -> Amount {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}

/// Component-wise `load <= capacity`. Missing components count as zero on
/// either side.
pub fn is_capacity_satisfied(capacity: &Amount, load: &Amount) -> bool {
    let len = capacity.len().max(load.len());
    (0..len).all(|i| load.get(i) <= capacity.get(i))
}

/// All-components-maximal vector, used to saturate break load margins when a
/// break carries no max-load.
pub fn max_amount(dimensions: usize) -> Amount {
    let mut vec = SmallVec::with_capacity(dimensions);
    vec.resize(dimensions, i64::MAX);
    Amount(vec)
}
