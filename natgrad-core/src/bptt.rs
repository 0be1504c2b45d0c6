//! Applying a block across every timestep of a batch of sequences.
use crate::{
    block::Block,
    gradient::Gradient,
    numeric::Scalar,
    seq::{Batch, GradSink, MemTape, Rereader, Tape},
};
use log::trace;
use std::{
    panic,
    sync::{
        mpsc::{sync_channel, Receiver, SyncSender},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
};

/// Strategy for applying a block to an input sequence.
pub trait ApplyPolicy: Send + Sync {
    fn apply<S: Scalar>(
        &self,
        input: Box<dyn Rereader<S>>,
        block: Arc<dyn Block<S>>,
    ) -> Box<dyn Rereader<S>>;
}

/// Back-propagation through time, optionally truncated.
///
/// With a horizon `h`, gradients flowing back through the recurrent state are
/// cut at every timestep that is a multiple of `h`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bptt {
    pub truncate: Option<usize>,
}

impl Bptt {
    pub fn full() -> Self {
        Self { truncate: None }
    }

    pub fn truncated(horizon: usize) -> Self {
        assert!(horizon > 0, "truncation horizon must be positive");
        Self {
            truncate: Some(horizon),
        }
    }
}

impl ApplyPolicy for Bptt {
    fn apply<S: Scalar>(
        &self,
        input: Box<dyn Rereader<S>>,
        block: Arc<dyn Block<S>>,
    ) -> Box<dyn Rereader<S>> {
        Box::new(BpttRereader::new(input, block, self.truncate))
    }
}

struct StepTrace<S> {
    present: Vec<bool>,
    inputs: Vec<Vec<S>>,
    states_in: Vec<Vec<S>>,
    states_out: Vec<Vec<S>>,
}

struct Trace<S> {
    steps: Vec<StepTrace<S>>,
    outputs: MemTape<S>,
}

enum ForwardState<S> {
    Idle,
    Running(JoinHandle<Trace<S>>),
    Done(Arc<Trace<S>>),
}

/// Output sequence of a block applied with BPTT.
///
/// The input sequence is treated as a constant: its `propagate` is never
/// called.
pub struct BpttRereader<S: Scalar> {
    input: Box<dyn Rereader<S>>,
    block: Arc<dyn Block<S>>,
    horizon: Option<usize>,
    state: Mutex<ForwardState<S>>,
}

impl<S: Scalar> BpttRereader<S> {
    pub fn new(
        input: Box<dyn Rereader<S>>,
        block: Arc<dyn Block<S>>,
        horizon: Option<usize>,
    ) -> Self {
        Self {
            input,
            block,
            horizon,
            state: Mutex::new(ForwardState::Idle),
        }
    }

    /// Waits for the forward pass, evaluating it here if it was never started.
    ///
    /// A running forward pass must have been drained (or its receiver dropped)
    /// first, or this blocks forever.
    fn trace(&self) -> Arc<Trace<S>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let trace = match std::mem::replace(&mut *state, ForwardState::Idle) {
            ForwardState::Idle => Arc::new(run_forward(&*self.block, self.input.forward(), None)),
            ForwardState::Running(handle) => {
                Arc::new(handle.join().unwrap_or_else(|e| panic::resume_unwind(e)))
            }
            ForwardState::Done(trace) => trace,
        };
        *state = ForwardState::Done(trace.clone());
        trace
    }
}

fn run_forward<S: Scalar>(
    block: &dyn Block<S>,
    inputs: Receiver<Batch<S>>,
    mut tx: Option<SyncSender<Batch<S>>>,
) -> Trace<S> {
    let mut states: Vec<Vec<S>> = Vec::new();
    let mut steps = Vec::new();
    let mut tape = MemTape::writer();
    for batch in inputs {
        if states.is_empty() {
            states = vec![block.start_state(); batch.present.len()];
        }
        assert_eq!(
            states.len(),
            batch.present.len(),
            "batch size changed between timesteps"
        );
        let mut step = StepTrace {
            present: batch.present.clone(),
            inputs: Vec::new(),
            states_in: Vec::new(),
            states_out: Vec::new(),
        };
        let mut packed = Vec::new();
        for (seq, row) in batch.present_indices().zip(batch.rows()) {
            let (out, next) = block.step(&states[seq], row);
            packed.extend(out);
            step.inputs.push(row.to_vec());
            let prev = std::mem::replace(&mut states[seq], next.clone());
            step.states_in.push(prev);
            step.states_out.push(next);
        }
        let out = Batch {
            present: batch.present,
            packed,
        };
        if let Some(sender) = &tx {
            if sender.send(out.clone()).is_err() {
                tx = None;
            }
        }
        tape.push(out);
        steps.push(step);
    }
    trace!("bptt forward: {} timesteps", steps.len());
    Trace {
        steps,
        outputs: tape.finish(),
    }
}

impl<S: Scalar> Rereader<S> for BpttRereader<S> {
    fn forward(&self) -> Receiver<Batch<S>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*state, ForwardState::Idle) {
            panic!("forward pass already started; use reread to read outputs again");
        }
        let inputs = self.input.forward();
        let block = self.block.clone();
        let (tx, rx) = sync_channel(1);
        let handle = thread::spawn(move || run_forward(&*block, inputs, Some(tx)));
        *state = ForwardState::Running(handle);
        rx
    }

    fn reread(&self, start: usize, end: Option<usize>) -> Receiver<Batch<S>> {
        self.trace().outputs.read_tape(start, end)
    }

    fn propagate(&self, upstream: Receiver<Batch<S>>, grad: &mut dyn GradSink<S>) {
        let trace = self.trace();
        let num_seqs = trace.steps.first().map_or(0, |s| s.present.len());
        let state_size = self.block.state_size();
        let mut state_grads: Vec<Option<Vec<S>>> = vec![None; num_seqs];
        let mut t = trace.steps.len();
        for out_grad in upstream {
            assert!(t > 0, "more upstream batches than timesteps");
            t -= 1;
            let step = &trace.steps[t];
            assert_eq!(
                out_grad.present, step.present,
                "upstream batch does not match timestep {}",
                t
            );
            grad.use_grad(&mut |g: &mut Gradient<S>| {
                for (k, (seq, row)) in out_grad.present_indices().zip(out_grad.rows()).enumerate() {
                    let carried = state_grads[seq]
                        .take()
                        .unwrap_or_else(|| vec![S::zero(); state_size]);
                    let prev = self.block.step_backward(
                        &step.states_in[k],
                        &step.inputs[k],
                        &step.states_out[k],
                        row,
                        &carried,
                        g,
                    );
                    state_grads[seq] = Some(prev);
                }
            });
            if matches!(self.horizon, Some(h) if t % h == 0) {
                state_grads.iter_mut().for_each(|s| *s = None);
            }
        }
        assert_eq!(t, 0, "fewer upstream batches than timesteps");
        trace!(
            "bptt backward: {} timesteps, horizon {:?}",
            trace.steps.len(),
            self.horizon
        );
    }
}
