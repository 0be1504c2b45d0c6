use ndarray::{ArrayView2, ArrayViewMut2, Axis};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::Debug,
    ops::{Add, AddAssign, Div, Mul, Neg, Sub},
};

/// Numeric type a block can be evaluated over.
///
/// Blocks are written once against this trait and instantiated for plain
/// `f64` values and for [`Dual`] numbers carrying one directional derivative.
pub trait Scalar:
    Copy
    + Debug
    + PartialEq
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + Serialize
    + DeserializeOwned
{
    fn zero() -> Self;
    fn one() -> Self;
    fn from_f64(value: f64) -> Self;
    /// The plain value, dropping any derivative information.
    fn value(&self) -> f64;
    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn tanh(self) -> Self;
    fn abs(self) -> Self;

    fn scale(self, s: f64) -> Self {
        self * Self::from_f64(s)
    }
}

impl Scalar for f64 {
    fn zero() -> Self {
        0.0
    }
    fn one() -> Self {
        1.0
    }
    fn from_f64(value: f64) -> Self {
        value
    }
    fn value(&self) -> f64 {
        *self
    }
    fn exp(self) -> Self {
        f64::exp(self)
    }
    fn ln(self) -> Self {
        f64::ln(self)
    }
    fn tanh(self) -> Self {
        f64::tanh(self)
    }
    fn abs(self) -> Self {
        f64::abs(self)
    }
}

/// A value paired with a single forward-mode tangent.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Dual {
    pub value: f64,
    pub tangent: f64,
}

impl Dual {
    pub fn new(value: f64, tangent: f64) -> Self {
        Self { value, tangent }
    }

    /// A value that is not being differentiated.
    pub fn constant(value: f64) -> Self {
        Self {
            value,
            tangent: 0.0,
        }
    }
}

impl Add for Dual {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Dual::new(self.value + other.value, self.tangent + other.tangent)
    }
}

impl AddAssign for Dual {
    fn add_assign(&mut self, other: Self) {
        self.value += other.value;
        self.tangent += other.tangent;
    }
}

impl Sub for Dual {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Dual::new(self.value - other.value, self.tangent - other.tangent)
    }
}

impl Mul for Dual {
    type Output = Self;

    fn mul(self, other: Self) -> Self {
        Dual::new(
            self.value * other.value,
            self.tangent * other.value + self.value * other.tangent,
        )
    }
}

impl Div for Dual {
    type Output = Self;

    fn div(self, other: Self) -> Self {
        Dual::new(
            self.value / other.value,
            (self.tangent * other.value - self.value * other.tangent) / (other.value * other.value),
        )
    }
}

impl Neg for Dual {
    type Output = Self;

    fn neg(self) -> Self {
        Dual::new(-self.value, -self.tangent)
    }
}

impl Scalar for Dual {
    fn zero() -> Self {
        Dual::constant(0.0)
    }
    fn one() -> Self {
        Dual::constant(1.0)
    }
    fn from_f64(value: f64) -> Self {
        Dual::constant(value)
    }
    fn value(&self) -> f64 {
        self.value
    }
    fn exp(self) -> Self {
        let e = self.value.exp();
        Dual::new(e, self.tangent * e)
    }
    fn ln(self) -> Self {
        Dual::new(self.value.ln(), self.tangent / self.value)
    }
    fn tanh(self) -> Self {
        let t = self.value.tanh();
        Dual::new(t, self.tangent * (1.0 - t * t))
    }
    fn abs(self) -> Self {
        if self.value < 0.0 {
            -self
        } else {
            self
        }
    }
}

// Duals serialize as `[value, tangent]`; a bare number deserializes as a constant,
// which is what lets a plain `f64` block be re-read as a `Dual` block.
impl Serialize for Dual {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (self.value, self.tangent).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Dual {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Value(f64),
            Pair(f64, f64),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Value(value) => Dual::constant(value),
            Repr::Pair(value, tangent) => Dual::new(value, tangent),
        })
    }
}

pub fn dot<S: Scalar>(a: &[S], b: &[S]) -> S {
    a.iter().zip(b).fold(S::zero(), |acc, (&x, &y)| acc + x * y)
}

/// `m * x` for a row-major `rows x cols` matrix.
pub fn mat_vec<S: Scalar>(m: &[S], rows: usize, cols: usize, x: &[S]) -> Vec<S> {
    let m = ArrayView2::from_shape((rows, cols), m).expect("matrix shape matches its data");
    m.outer_iter()
        .map(|row| {
            row.iter()
                .zip(x)
                .fold(S::zero(), |acc, (&w, &xi)| acc + w * xi)
        })
        .collect()
}

/// `m^T * y` for a row-major `rows x cols` matrix.
pub fn mat_t_vec<S: Scalar>(m: &[S], rows: usize, cols: usize, y: &[S]) -> Vec<S> {
    let m = ArrayView2::from_shape((rows, cols), m).expect("matrix shape matches its data");
    m.axis_iter(Axis(1))
        .map(|col| {
            col.iter()
                .zip(y)
                .fold(S::zero(), |acc, (&w, &yi)| acc + w * yi)
        })
        .collect()
}

/// `dst += a * b^T` for a row-major `a.len() x b.len()` matrix.
pub fn add_outer<S: Scalar>(dst: &mut [S], a: &[S], b: &[S]) {
    let mut m =
        ArrayViewMut2::from_shape((a.len(), b.len()), dst).expect("matrix shape matches its data");
    for ((i, j), w) in m.indexed_iter_mut() {
        *w += a[i] * b[j];
    }
}

pub fn add_assign<S: Scalar>(dst: &mut [S], src: &[S]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d += s;
    }
}
