use anyhow::Result;
use natgrad_algorithms::natural_pg::conjugate_gradients;
use natgrad_core::*;
use ndarray::{arr1, arr2, Array1, Array2};

struct Fixture {
    a: Param<f64>,
    b: Param<f64>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            a: Param::zeros(2),
            b: Param::zeros(1),
        }
    }

    fn to_array(&self, g: &Gradient) -> Array1<f64> {
        g[&self.a.id]
            .iter()
            .chain(&g[&self.b.id])
            .copied()
            .collect()
    }

    fn from_array(&self, x: &Array1<f64>) -> Gradient {
        let mut g = Gradient::for_params([&self.a, &self.b]);
        g.insert(self.a.id, vec![x[0], x[1]]);
        g.insert(self.b.id, vec![x[2]]);
        g
    }

    fn operator<'a>(
        &'a self,
        matrix: &'a Array2<f64>,
        calls: &'a mut usize,
    ) -> impl FnMut(&Gradient) -> Result<Gradient> + 'a {
        move |v| {
            *calls += 1;
            Ok(self.from_array(&matrix.dot(&self.to_array(v))))
        }
    }
}

fn spd() -> Array2<f64> {
    arr2(&[[4.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 2.0]])
}

#[test_log::test]
fn test_solves_spd_system() {
    let fixture = Fixture::new();
    let matrix = spd();
    let b = arr1(&[1.0, 2.0, 3.0]);
    let mut calls = 0;
    let x = conjugate_gradients(
        &fixture.from_array(&b),
        3,
        fixture.operator(&matrix, &mut calls),
    )
    .unwrap();
    let residual = matrix.dot(&fixture.to_array(&x)) - &b;
    assert!(residual.iter().all(|r| r.abs() < 1e-10), "{:?}", residual);
    assert_eq!(calls, 3);
}

#[test]
fn test_extra_iterations_keep_exact_solution() {
    let fixture = Fixture::new();
    let matrix = Array2::from_diag(&arr1(&[2.0, 2.0, 2.0]));
    let b = arr1(&[1.0, -1.0, 0.5]);
    let mut calls = 0;
    let x = conjugate_gradients(
        &fixture.from_array(&b),
        10,
        fixture.operator(&matrix, &mut calls),
    )
    .unwrap();
    assert_eq!(fixture.to_array(&x), arr1(&[0.5, -0.5, 0.25]));
    assert_eq!(calls, 1);
}

#[test]
fn test_zero_iterations_returns_zero() {
    let fixture = Fixture::new();
    let matrix = spd();
    let mut calls = 0;
    let b = fixture.from_array(&arr1(&[1.0, 2.0, 3.0]));
    let x = conjugate_gradients(&b, 0, fixture.operator(&matrix, &mut calls)).unwrap();
    assert!(x.all_zero());
    assert_eq!(x.keys().count(), 2);
    assert_eq!(calls, 0);
}

#[test]
fn test_damping_shrinks_solution() {
    let fixture = Fixture::new();
    let b = fixture.from_array(&arr1(&[1.0, 2.0, 3.0]));
    let mut last_norm = f64::INFINITY;
    for damping in [0.0, 0.1, 1.0, 10.0] {
        let matrix = spd() + Array2::<f64>::eye(3) * damping;
        let mut calls = 0;
        let x = conjugate_gradients(&b, 3, fixture.operator(&matrix, &mut calls)).unwrap();
        let norm = x.dot(&x).sqrt();
        assert!(norm < last_norm, "damping {} gave norm {}", damping, norm);
        last_norm = norm;
    }
}

#[test]
fn test_operator_errors_propagate() {
    let fixture = Fixture::new();
    let b = fixture.from_array(&arr1(&[1.0, 0.0, 0.0]));
    let result = conjugate_gradients(&b, 3, |_| Err(anyhow::anyhow!("operator failed")));
    assert!(result.is_err());
}

#[test]
fn test_zero_rhs_returns_zero_without_products() {
    let fixture = Fixture::new();
    let matrix = spd();
    let mut calls = 0;
    let b = fixture.from_array(&arr1(&[0.0, 0.0, 0.0]));
    let x = conjugate_gradients(&b, 5, fixture.operator(&matrix, &mut calls)).unwrap();
    assert!(x.all_zero());
    assert!(fixture.to_array(&x).iter().all(|v| v.is_finite()));
    assert_eq!(calls, 0);
}
