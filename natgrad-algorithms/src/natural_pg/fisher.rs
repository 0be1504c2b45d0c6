use super::FisherProduct;
use anyhow::{anyhow, Result};
use log::trace;
use natgrad_core::{
    propagate_reversed, ApplyPolicy, Batch, Block, Dual, GradSink, Gradient, KLer, LiftTape,
    ParamId, Policy, Rereader, Reuser, RolloutSet, Scalar, TapeRereader,
};
use std::{
    collections::BTreeMap,
    sync::{
        mpsc::{sync_channel, Receiver},
        Arc,
    },
    thread,
};

/// Computes `(F + damping * I) v`, where `F` is the Fisher information of the
/// policy's action distribution averaged over every output row.
///
/// The product is the directional derivative (along `v`) of the gradient of
/// the mean KL divergence between the current outputs and perturbed outputs,
/// evaluated with a dual number forward pass and a plain backward pass.
pub struct FisherVectorProduct<'a, P, A, F> {
    pub policy: &'a P,
    pub action_space: &'a A,
    pub apply_policy: &'a F,
    pub damping: f64,
}

impl<'a, P, A, F> FisherProduct for FisherVectorProduct<'a, P, A, F>
where
    P: Policy,
    A: KLer,
    F: ApplyPolicy,
{
    fn fisher_product(
        &mut self,
        rollouts: &RolloutSet,
        outputs: &Reuser<f64>,
        v: &Gradient,
    ) -> Result<Gradient> {
        let (fwd, fwd_to_regular) = make_fwd(self.policy, v)?;
        let fwd = Arc::new(fwd);
        let block: Arc<dyn Block<Dual>> = fwd.clone();
        let unfwd = UnfwdRereader {
            fwd: self.apply_policy.apply(
                Box::new(TapeRereader(LiftTape(rollouts.inputs().clone()))),
                block,
            ),
            regular: outputs,
            fwd_to_regular: &fwd_to_regular,
        };

        let (kl, upstream) = mean_kl_upstream(&unfwd, outputs, self.action_space)?;
        trace!("fisher product: mean kl {}", kl.value);

        let mut dual_grad: Gradient<Dual> = Gradient::for_params(
            fwd.parameters()
                .into_iter()
                .filter(|p| v.contains(&fwd_to_regular[&p.id])),
        );
        propagate_reversed(&unfwd, upstream, &mut dual_grad);

        let mut product: Gradient = dual_grad
            .into_iter()
            .map(|(id, vec)| {
                let tangents = vec.iter().map(|x| x.tangent).collect();
                (fwd_to_regular[&id], tangents)
            })
            .collect();
        if self.damping > 0.0 {
            for (id, vec) in product.iter_mut() {
                for (x, &d) in vec.iter_mut().zip(&v[id]) {
                    *x += self.damping * d;
                }
            }
        }
        Ok(product)
    }
}

/// Clones `policy` into dual numbers with the tangents set to `v`.
///
/// Returns the clone and a map from its parameter ids to the ids of the
/// matching parameters of `policy`. Parameters missing from `v` get zero
/// tangents.
pub fn make_fwd<P: Policy>(
    policy: &P,
    v: &Gradient,
) -> Result<(P::Fwd, BTreeMap<ParamId, ParamId>)> {
    let mut fwd = policy.make_fwd()?;
    let regular = policy.parameters();
    let mut fwd_to_regular = BTreeMap::new();
    let dual_params = fwd.parameters_mut();
    assert_eq!(
        dual_params.len(),
        regular.len(),
        "mismatched parameter key sets"
    );
    for (dual, reg) in dual_params.into_iter().zip(regular) {
        assert_eq!(dual.len(), reg.len(), "mismatched parameter key sets");
        if let Some(direction) = v.get(&reg.id) {
            assert_eq!(
                direction.len(),
                dual.len(),
                "direction size mismatch for {}",
                reg.id
            );
            for (x, &d) in dual.value.iter_mut().zip(direction) {
                x.tangent = d;
            }
        }
        fwd_to_regular.insert(dual.id, reg.id);
    }
    Ok((fwd, fwd_to_regular))
}

/// Mean KL divergence from the recorded outputs in `reference` to the dual
/// outputs of `seq`, together with its gradient for every output row.
///
/// The gradient batches are in timestep order. Both sequences are forwarded.
pub fn mean_kl_upstream<A: KLer>(
    seq: &dyn Rereader<Dual>,
    reference: &dyn Rereader<f64>,
    action_space: &A,
) -> Result<(Dual, Vec<Batch<Dual>>)> {
    let references = reference.forward();
    let mut total = Dual::zero();
    let mut num_rows = 0usize;
    let mut upstream = Vec::new();
    for out in seq.forward() {
        let expected = references
            .recv()
            .map_err(|_| anyhow!("Reference outputs ended before the dual outputs"))?;
        if expected.present != out.present {
            return Err(anyhow!(
                "Reference and dual outputs disagree on timestep {}",
                upstream.len()
            ));
        }
        let mut packed = Vec::with_capacity(out.packed.len());
        for (p, q) in expected.rows().zip(out.rows()) {
            let p: Vec<Dual> = p.iter().map(|&x| Dual::constant(x)).collect();
            total += action_space.kl(&p, q);
            packed.extend(action_space.kl_grad(&p, q));
            num_rows += 1;
        }
        upstream.push(Batch {
            present: out.present,
            packed,
        });
    }
    if references.recv().is_ok() {
        return Err(anyhow!(
            "Reference outputs have more timesteps than the dual outputs"
        ));
    }
    if num_rows == 0 {
        return Err(anyhow!(
            "Cannot average KL divergence over zero output rows"
        ));
    }

    let scale = 1.0 / num_rows as f64;
    for batch in upstream.iter_mut() {
        batch.packed.iter_mut().for_each(|x| *x = x.scale(scale));
    }
    Ok((total.scale(scale), upstream))
}

/// Dual number outputs whose backward pass runs through the plain outputs.
///
/// At the reference point the value part of every upstream gradient is zero,
/// so the tangent of the parameter gradient is exactly the plain backward pass
/// applied to the upstream tangents.
pub struct UnfwdRereader<'a> {
    pub fwd: Box<dyn Rereader<Dual>>,
    pub regular: &'a dyn Rereader<f64>,
    pub fwd_to_regular: &'a BTreeMap<ParamId, ParamId>,
}

impl<'a> Rereader<Dual> for UnfwdRereader<'a> {
    fn forward(&self) -> Receiver<Batch<Dual>> {
        self.fwd.forward()
    }

    fn reread(&self, start: usize, end: Option<usize>) -> Receiver<Batch<Dual>> {
        self.fwd.reread(start, end)
    }

    fn propagate(&self, upstream: Receiver<Batch<Dual>>, grad: &mut dyn GradSink<Dual>) {
        let (tx, rx) = sync_channel(1);
        thread::spawn(move || {
            for batch in upstream {
                if tx.send(batch.map(|x| x.tangent)).is_err() {
                    return;
                }
            }
        });
        let mut surrogate = SurrogateGrad {
            orig: grad,
            fwd_to_regular: self.fwd_to_regular,
        };
        self.regular.propagate(rx, &mut surrogate);
    }
}

/// Presents the tangents of a dual gradient as a plain gradient keyed by the
/// regular parameter ids.
struct SurrogateGrad<'a, 'g> {
    orig: &'a mut (dyn GradSink<Dual> + 'g),
    fwd_to_regular: &'a BTreeMap<ParamId, ParamId>,
}

impl GradSink<f64> for SurrogateGrad<'_, '_> {
    fn use_grad(&mut self, f: &mut dyn FnMut(&mut Gradient<f64>)) {
        let fwd_to_regular = self.fwd_to_regular;
        self.orig.use_grad(&mut |dual: &mut Gradient<Dual>| {
            let mut regular: Gradient = dual
                .iter()
                .map(|(id, vec)| {
                    let reg = fwd_to_regular
                        .get(id)
                        .unwrap_or_else(|| panic!("superfluous gradient variable: {}", id));
                    (*reg, vec.iter().map(|x| x.tangent).collect())
                })
                .collect();
            f(&mut regular);
            for (id, vec) in dual.iter_mut() {
                let tangents = &regular[&fwd_to_regular[id]];
                for (x, &t) in vec.iter_mut().zip(tangents) {
                    x.tangent = t;
                }
            }
        });
    }
}
