use natgrad_algorithms::natural_pg::{make_fwd, mean_kl_upstream, UnfwdRereader};
use natgrad_algorithms::*;
use natgrad_core::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{collections::BTreeMap, sync::Arc};

fn rollouts(rng: &mut StdRng) -> RolloutSet {
    let lens = [3, 1, 4];
    RolloutSet::from_sequences(
        lens.iter()
            .map(|&len| Rollout {
                inputs: (0..len)
                    .map(|_| vec![rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)])
                    .collect(),
                actions: vec![vec![1.0, 0.0, 0.0]; len],
                rewards: vec![1.0; len],
            })
            .collect(),
    )
    .unwrap()
}

fn random_direction(policy: &Rnn<f64>, rng: &mut StdRng) -> Gradient {
    policy
        .parameters()
        .into_iter()
        .map(|p| {
            let values: Vec<f64> = (0..p.len()).map(|_| rng.gen_range(-1.0..1.0)).collect();
            (p.id, values)
        })
        .collect()
}

fn setup(seed: u8) -> (Arc<Rnn<f64>>, RolloutSet, StdRng) {
    let mut rng = StdRng::from_seed([seed; 32]);
    let policy = Arc::new(Rnn::new(2, 3, 3, &mut rng));
    let rollouts = rollouts(&mut rng);
    (policy, rollouts, rng)
}

fn regular_outputs(policy: &Arc<Rnn<f64>>, rollouts: &RolloutSet) -> Reuser<f64> {
    let block: Arc<dyn Block<f64>> = policy.clone();
    let inputs: Box<dyn Rereader<f64>> = Box::new(TapeRereader(rollouts.inputs().clone()));
    Reuser::new(Bptt::full().apply(inputs, block))
}

fn fisher_product(
    policy: &Arc<Rnn<f64>>,
    rollouts: &RolloutSet,
    v: &Gradient,
    damping: f64,
) -> Gradient {
    let bptt = Bptt::full();
    let mut fisher = FisherVectorProduct {
        policy: policy.as_ref(),
        action_space: &Softmax,
        apply_policy: &bptt,
        damping,
    };
    fisher
        .fisher_product(rollouts, &regular_outputs(policy, rollouts), v)
        .unwrap()
}

/// Outputs of `policy` moved by `eps` along `v`, evaluated step by step.
fn outputs_at(policy: &Rnn<f64>, v: &Gradient, eps: f64, rollouts: &RolloutSet) -> Vec<Vec<f64>> {
    let value = serde_json::to_value(policy).unwrap();
    let mut moved: Rnn<f64> = serde_json::from_value(value).unwrap();
    for (dst, src) in moved.parameters_mut().into_iter().zip(policy.parameters()) {
        for (x, d) in dst.value.iter_mut().zip(&v[&src.id]) {
            *x += eps * d;
        }
    }
    let mut rows = Vec::new();
    for rollout in rollouts.rollouts() {
        let mut state = moved.start_state();
        for input in rollout.inputs.iter() {
            let (out, next) = moved.step(&state, input);
            rows.push(out);
            state = next;
        }
    }
    rows
}

fn mean_kl(reference: &[Vec<f64>], moved: &[Vec<f64>]) -> f64 {
    let total: f64 = reference
        .iter()
        .zip(moved)
        .map(|(p, q)| Softmax.kl(p, q))
        .sum();
    total / reference.len() as f64
}

#[test_log::test]
fn test_matches_finite_difference_curvature() {
    let (policy, rollouts, mut rng) = setup(11);
    let v = random_direction(&policy, &mut rng);
    let exact = v.dot(&fisher_product(&policy, &rollouts, &v, 0.0));
    assert!(exact > 0.0);

    let reference = outputs_at(&policy, &v, 0.0, &rollouts);
    let error = |eps: f64| {
        let plus = mean_kl(&reference, &outputs_at(&policy, &v, eps, &rollouts));
        let minus = mean_kl(&reference, &outputs_at(&policy, &v, -eps, &rollouts));
        let estimate = (plus + minus) / (eps * eps);
        ((estimate - exact) / exact).abs()
    };
    let coarse = error(1e-2);
    let fine = error(1e-3);
    assert!(fine < 1e-3, "relative error {}", fine);
    assert!(fine < coarse, "{} should be below {}", fine, coarse);
}

#[test]
fn test_is_symmetric() {
    let (policy, rollouts, mut rng) = setup(12);
    let u = random_direction(&policy, &mut rng);
    let v = random_direction(&policy, &mut rng);
    let ufv = u.dot(&fisher_product(&policy, &rollouts, &v, 0.0));
    let vfu = v.dot(&fisher_product(&policy, &rollouts, &u, 0.0));
    assert!((ufv - vfu).abs() < 1e-10 * ufv.abs().max(1.0));
}

#[test]
fn test_damping_adds_scaled_direction() {
    let (policy, rollouts, mut rng) = setup(13);
    let v = random_direction(&policy, &mut rng);
    let mut damped = fisher_product(&policy, &rollouts, &v, 0.5);
    damped.sub(&fisher_product(&policy, &rollouts, &v, 0.0));
    for (id, diff) in damped.iter() {
        for (d, x) in diff.iter().zip(&v[id]) {
            assert!((d - 0.5 * x).abs() < 1e-12);
        }
    }
}

#[test]
fn test_result_only_covers_direction_keys() {
    let (policy, rollouts, mut rng) = setup(14);
    let full = random_direction(&policy, &mut rng);
    let id = policy.w_out.id;
    let v: Gradient = [(id, full[&id].clone())].into_iter().collect();
    let product = fisher_product(&policy, &rollouts, &v, 0.1);
    assert_eq!(product.keys().collect::<Vec<_>>(), vec![&id]);
}

#[test]
fn test_shortcut_matches_full_dual_backward() {
    let (policy, rollouts, mut rng) = setup(15);
    let v = random_direction(&policy, &mut rng);
    let shortcut = fisher_product(&policy, &rollouts, &v, 0.0);

    let (fwd, fwd_to_regular) = make_fwd(policy.as_ref(), &v).unwrap();
    let fwd = Arc::new(fwd);
    let block: Arc<dyn Block<Dual>> = fwd.clone();
    let dual_outputs = Bptt::full().apply(
        Box::new(TapeRereader(LiftTape(rollouts.inputs().clone()))),
        block,
    );
    let regular = regular_outputs(&policy, &rollouts);
    let (kl, upstream) = mean_kl_upstream(dual_outputs.as_ref(), &regular, &Softmax).unwrap();
    assert!(kl.value.abs() < 1e-12);
    assert!(kl.tangent.abs() < 1e-12);

    let mut dual_grad = Gradient::for_params(fwd.parameters());
    propagate_reversed(dual_outputs.as_ref(), upstream, &mut dual_grad);
    for (dual_id, vec) in dual_grad.iter() {
        let expected = &shortcut[&fwd_to_regular[dual_id]];
        for (x, e) in vec.iter().zip(expected) {
            assert!((x.tangent - e).abs() < 1e-10, "{} vs {}", x.tangent, e);
        }
    }
}

#[test]
#[should_panic(expected = "superfluous gradient variable")]
fn test_unmapped_dual_parameter_panics() {
    let (policy, rollouts, mut rng) = setup(16);
    let v = random_direction(&policy, &mut rng);
    let (fwd, _) = make_fwd(policy.as_ref(), &v).unwrap();
    let fwd = Arc::new(fwd);
    let block: Arc<dyn Block<Dual>> = fwd.clone();
    let empty = BTreeMap::new();
    let regular = regular_outputs(&policy, &rollouts);
    let unfwd = UnfwdRereader {
        fwd: Bptt::full().apply(
            Box::new(TapeRereader(LiftTape(rollouts.inputs().clone()))),
            block,
        ),
        regular: &regular,
        fwd_to_regular: &empty,
    };
    let (_, upstream) = mean_kl_upstream(&unfwd, &regular, &Softmax).unwrap();
    let mut dual_grad = Gradient::for_params(fwd.parameters());
    propagate_reversed(&unfwd, upstream, &mut dual_grad);
}

#[test]
#[should_panic(expected = "mismatched parameter key sets")]
fn test_mismatched_clone_panics() {
    use serde::{Deserialize, Serialize};

    /// Loses its bias when cloned into dual numbers.
    #[derive(Serialize, Deserialize)]
    #[serde(bound = "S: Scalar")]
    struct Lossy<S: Scalar> {
        weight: Param<S>,
        #[serde(skip_deserializing)]
        bias: Option<Param<S>>,
    }

    impl<S: Scalar> Block<S> for Lossy<S> {
        fn input_size(&self) -> usize {
            1
        }
        fn output_size(&self) -> usize {
            1
        }
        fn state_size(&self) -> usize {
            0
        }
        fn step(&self, _: &[S], input: &[S]) -> (Vec<S>, Vec<S>) {
            (vec![self.weight.value[0] * input[0]], Vec::new())
        }
        fn step_backward(
            &self,
            _: &[S],
            _: &[S],
            _: &[S],
            _: &[S],
            _: &[S],
            _: &mut Gradient<S>,
        ) -> Vec<S> {
            Vec::new()
        }
        fn parameters(&self) -> Vec<&Param<S>> {
            std::iter::once(&self.weight).chain(&self.bias).collect()
        }
        fn parameters_mut(&mut self) -> Vec<&mut Param<S>> {
            std::iter::once(&mut self.weight)
                .chain(&mut self.bias)
                .collect()
        }
    }

    impl Policy for Lossy<f64> {
        type Fwd = Lossy<Dual>;
    }

    let policy = Lossy {
        weight: Param::new(vec![1.0]),
        bias: Some(Param::new(vec![0.0])),
    };
    let _ = make_fwd(&policy, &Gradient::new());
}
