use crate::{
    numeric::{self, Scalar},
    param::{Param, ParamId},
};
use std::{
    collections::{btree_map, BTreeMap},
    ops::Index,
};

/// Maps parameters to dense vectors of the same dimensionality.
///
/// The binary operations (`add`, `sub`, `set`) walk the keys of `self` and
/// expect `src` to contain every one of them. A missing key is a programmer
/// error and panics.
#[derive(Clone, Debug, PartialEq)]
pub struct Gradient<S = f64>(BTreeMap<ParamId, Vec<S>>);

impl<S: Scalar> Default for Gradient<S> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<S: Scalar> Gradient<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zeroed gradient covering `params`.
    pub fn for_params<'a, I>(params: I) -> Self
    where
        I: IntoIterator<Item = &'a Param<S>>,
    {
        params
            .into_iter()
            .map(|p| (p.id, vec![S::zero(); p.len()]))
            .collect()
    }

    pub fn insert(&mut self, id: ParamId, vec: Vec<S>) -> Option<Vec<S>> {
        self.0.insert(id, vec)
    }

    pub fn get(&self, id: &ParamId) -> Option<&Vec<S>> {
        self.0.get(id)
    }

    pub fn get_mut(&mut self, id: &ParamId) -> Option<&mut Vec<S>> {
        self.0.get_mut(id)
    }

    pub fn contains(&self, id: &ParamId) -> bool {
        self.0.contains_key(id)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ParamId> {
        self.0.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, ParamId, Vec<S>> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> btree_map::IterMut<'_, ParamId, Vec<S>> {
        self.0.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Adds `delta` into the entry for `id`. Untracked ids are ignored.
    pub fn accumulate(&mut self, id: ParamId, delta: &[S]) {
        if let Some(dst) = self.0.get_mut(&id) {
            assert_eq!(dst.len(), delta.len(), "gradient size mismatch for {}", id);
            numeric::add_assign(dst, delta);
        }
    }

    /// Same keys and shapes, all zeros.
    pub fn zeroed(&self) -> Self {
        self.0
            .iter()
            .map(|(id, vec)| (*id, vec![S::zero(); vec.len()]))
            .collect()
    }

    pub fn scale(&mut self, s: S) {
        for vec in self.0.values_mut() {
            for x in vec.iter_mut() {
                *x = *x * s;
            }
        }
    }

    pub fn add(&mut self, src: &Self) {
        for (id, dst) in self.0.iter_mut() {
            for (d, &s) in dst.iter_mut().zip(&src[id]) {
                *d = *d + s;
            }
        }
    }

    pub fn sub(&mut self, src: &Self) {
        for (id, dst) in self.0.iter_mut() {
            for (d, &s) in dst.iter_mut().zip(&src[id]) {
                *d = *d - s;
            }
        }
    }

    /// Overwrites every entry of `self` with the matching entry of `src`.
    pub fn set(&mut self, src: &Self) {
        for (id, dst) in self.0.iter_mut() {
            dst.copy_from_slice(&src[id]);
        }
    }

    /// Sum of the vector dot products over the keys both gradients share.
    ///
    /// # Panics
    ///
    /// Panics when there is nothing to sum, e.g. when both gradients are empty.
    pub fn dot(&self, other: &Self) -> S {
        let mut sum: Option<S> = None;
        for (id, vec) in self.0.iter() {
            if let Some(other_vec) = other.get(id) {
                assert_eq!(
                    vec.len(),
                    other_vec.len(),
                    "gradient size mismatch for {}",
                    id
                );
                let term = numeric::dot(vec, other_vec);
                sum = Some(match sum {
                    Some(acc) => acc + term,
                    None => term,
                });
            }
        }
        sum.expect("cannot dot empty gradients")
    }

    /// True iff the absolute sum of every vector is exactly zero.
    pub fn all_zero(&self) -> bool {
        self.0.values().all(|vec| {
            let abs_sum = vec.iter().fold(S::zero(), |acc, &x| acc + x.abs());
            abs_sum == S::zero()
        })
    }
}

impl<S> Index<&ParamId> for Gradient<S> {
    type Output = Vec<S>;

    fn index(&self, id: &ParamId) -> &Vec<S> {
        self.0
            .get(id)
            .unwrap_or_else(|| panic!("gradient has no entry for {}", id))
    }
}

impl<S> FromIterator<(ParamId, Vec<S>)> for Gradient<S> {
    fn from_iter<I: IntoIterator<Item = (ParamId, Vec<S>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<S> IntoIterator for Gradient<S> {
    type Item = (ParamId, Vec<S>);
    type IntoIter = btree_map::IntoIter<ParamId, Vec<S>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, S> IntoIterator for &'a Gradient<S> {
    type Item = (&'a ParamId, &'a Vec<S>);
    type IntoIter = btree_map::Iter<'a, ParamId, Vec<S>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
