use crate::numeric::Scalar;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_PARAM_ID: AtomicU64 = AtomicU64::new(0);

/// Opaque handle identifying one parameter vector.
///
/// Ids are never reused within a process. A block that is deserialized (or
/// lifted to another scalar type) gets fresh ids for all of its parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamId(u64);

impl ParamId {
    pub fn fresh() -> Self {
        ParamId(NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "param#{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "S: Scalar")]
pub struct Param<S: Scalar> {
    #[serde(skip, default = "ParamId::fresh")]
    pub id: ParamId,
    pub value: Vec<S>,
}

impl<S: Scalar> Param<S> {
    pub fn new(value: Vec<S>) -> Self {
        Self {
            id: ParamId::fresh(),
            value,
        }
    }

    pub fn zeros(len: usize) -> Self {
        Self::new(vec![S::zero(); len])
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}
