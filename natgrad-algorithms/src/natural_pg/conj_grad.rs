use anyhow::Result;
use log::trace;
use natgrad_core::Gradient;

/// Approximately solves `A x = b` with a fixed number of conjugate gradient
/// iterations, where `apply` computes `A v`.
///
/// There is no tolerance based early exit. The only shortcut is an exactly
/// zero residual, at which point `x` already solves the system. This is the
/// one case where the result differs from running every iteration of the
/// plain recurrence, which would go on to divide `0 / 0` and return NaN.
/// A search direction with zero curvature and a non-zero residual is not
/// guarded against and yields non-finite values.
pub fn conjugate_gradients<F>(b: &Gradient, iters: usize, mut apply: F) -> Result<Gradient>
where
    F: FnMut(&Gradient) -> Result<Gradient>,
{
    let mut x = b.zeroed();
    let mut residual = b.clone();
    let mut direction = b.clone();
    let mut residual_mag = residual.dot(&residual);

    for i in 0..iters {
        if residual_mag == 0.0 {
            trace!("conjugate gradients: exact solution after {} iterations", i);
            break;
        }
        let applied = apply(&direction)?;
        let alpha = residual_mag / direction.dot(&applied);

        let mut step = direction.clone();
        step.scale(alpha);
        x.add(&step);

        let mut applied = applied;
        applied.scale(alpha);
        residual.sub(&applied);

        let next_mag = residual.dot(&residual);
        let beta = next_mag / residual_mag;
        residual_mag = next_mag;

        let mut next_direction = direction;
        next_direction.scale(beta);
        next_direction.add(&residual);
        direction = next_direction;

        trace!(
            "conjugate gradients: iteration {}, residual {}",
            i,
            residual_mag
        );
    }
    Ok(x)
}
