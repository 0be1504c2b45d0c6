//! Lazily evaluated sequences of batches.
//!
//! A sequence is delivered one timestep at a time over a channel with a
//! buffer depth of one, so a producer thread can decode the next batch while
//! the consumer works on the current one. Every read owns its own channel and
//! is single use; reading the same range again means opening a new read over
//! recorded data, never rewinding a live channel.
//!
//! Forward passes deliver batches in increasing timestep order. Backward
//! passes receive their upstream gradients in decreasing timestep order.
use crate::{
    gradient::Gradient,
    numeric::{Dual, Scalar},
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{sync_channel, Receiver},
        Arc,
    },
    thread,
};

/// One timestep across a batch of sequences.
///
/// `present[i]` tells whether sequence `i` has a value at this timestep.
/// `packed` holds one row per present sequence, in sequence order.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch<S> {
    pub present: Vec<bool>,
    pub packed: Vec<S>,
}

impl<S> Batch<S> {
    pub fn num_present(&self) -> usize {
        self.present.iter().filter(|&&p| p).count()
    }

    pub fn row_size(&self) -> usize {
        match self.num_present() {
            0 => 0,
            n => self.packed.len() / n,
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = &[S]> {
        let row_size = self.row_size();
        (0..self.num_present()).map(move |i| &self.packed[i * row_size..(i + 1) * row_size])
    }

    /// Indices of the present sequences, matching the order of `rows`.
    pub fn present_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.present
            .iter()
            .enumerate()
            .filter(|(_, &p)| p)
            .map(|(i, _)| i)
    }

    pub fn map<T>(&self, f: impl Fn(&S) -> T) -> Batch<T> {
        Batch {
            present: self.present.clone(),
            packed: self.packed.iter().map(f).collect(),
        }
    }
}

/// Recorded sequence data that can be read any number of times.
pub trait Tape<S>: Send + Sync {
    /// Reads timesteps `start..end`, or to the end of the tape when `end` is `None`.
    fn read_tape(&self, start: usize, end: Option<usize>) -> Receiver<Batch<S>>;
}

/// An in-memory tape. Immutable once built.
#[derive(Clone, Debug)]
pub struct MemTape<S> {
    batches: Arc<Vec<Batch<S>>>,
}

impl<S: Clone + Send + Sync + 'static> MemTape<S> {
    pub fn new(batches: Vec<Batch<S>>) -> Self {
        Self {
            batches: Arc::new(batches),
        }
    }

    pub fn writer() -> TapeWriter<S> {
        TapeWriter {
            batches: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn batches(&self) -> &[Batch<S>] {
        &self.batches
    }
}

impl<S: Clone + Send + Sync + 'static> Tape<S> for MemTape<S> {
    fn read_tape(&self, start: usize, end: Option<usize>) -> Receiver<Batch<S>> {
        let batches = self.batches.clone();
        let (tx, rx) = sync_channel(1);
        thread::spawn(move || {
            let end = end.unwrap_or(batches.len()).min(batches.len());
            for batch in batches.iter().take(end).skip(start) {
                if tx.send(batch.clone()).is_err() {
                    return;
                }
            }
        });
        rx
    }
}

/// Records batches for a [`MemTape`].
pub struct TapeWriter<S> {
    batches: Vec<Batch<S>>,
}

impl<S: Clone + Send + Sync + 'static> TapeWriter<S> {
    pub fn push(&mut self, batch: Batch<S>) {
        self.batches.push(batch);
    }

    pub fn finish(self) -> MemTape<S> {
        MemTape::new(self.batches)
    }
}

/// Presents a plain tape as constants in the dual number context.
#[derive(Clone, Debug)]
pub struct LiftTape<T>(pub T);

impl<T: Tape<f64>> Tape<Dual> for LiftTape<T> {
    fn read_tape(&self, start: usize, end: Option<usize>) -> Receiver<Batch<Dual>> {
        let source = self.0.read_tape(start, end);
        let (tx, rx) = sync_channel(1);
        thread::spawn(move || {
            for batch in source {
                if tx.send(batch.map(|&x| Dual::constant(x))).is_err() {
                    return;
                }
            }
        });
        rx
    }
}

/// Receives parameter gradients from a backward pass.
///
/// The backward pass asks for access to the gradient it should add into;
/// wrappers can translate between gradient representations around the call.
pub trait GradSink<S: Scalar> {
    fn use_grad(&mut self, f: &mut dyn FnMut(&mut Gradient<S>));
}

impl<S: Scalar> GradSink<S> for Gradient<S> {
    fn use_grad(&mut self, f: &mut dyn FnMut(&mut Gradient<S>)) {
        f(self)
    }
}

/// A differentiable sequence whose outputs can be read more than once.
pub trait Rereader<S: Scalar> {
    /// Evaluates the sequence, streaming outputs in timestep order.
    fn forward(&self) -> Receiver<Batch<S>>;

    /// Reads already computed outputs for timesteps `start..end`.
    fn reread(&self, start: usize, end: Option<usize>) -> Receiver<Batch<S>>;

    /// Back-propagates `upstream` (last timestep first) into `grad`.
    ///
    /// The forward pass must have been drained before this is called.
    fn propagate(&self, upstream: Receiver<Batch<S>>, grad: &mut dyn GradSink<S>);
}

/// A constant sequence read straight from a tape.
pub struct TapeRereader<T>(pub T);

impl<S: Scalar, T: Tape<S>> Rereader<S> for TapeRereader<T> {
    fn forward(&self) -> Receiver<Batch<S>> {
        self.0.read_tape(0, None)
    }

    fn reread(&self, start: usize, end: Option<usize>) -> Receiver<Batch<S>> {
        self.0.read_tape(start, end)
    }

    fn propagate(&self, upstream: Receiver<Batch<S>>, _grad: &mut dyn GradSink<S>) {
        for _ in upstream {}
    }
}

/// Lets a one-shot sequence be forwarded again without recomputation.
///
/// The first `forward` evaluates the wrapped sequence. After `reuse`, the next
/// `forward` replays the recorded outputs from the first timestep.
pub struct Reuser<S: Scalar> {
    inner: Box<dyn Rereader<S>>,
    evaluated: AtomicBool,
    consumed: AtomicBool,
}

impl<S: Scalar> Reuser<S> {
    pub fn new(inner: Box<dyn Rereader<S>>) -> Self {
        Self {
            inner,
            evaluated: AtomicBool::new(false),
            consumed: AtomicBool::new(false),
        }
    }

    /// Rewinds the read cursor so the next `forward` starts from the beginning.
    pub fn reuse(&self) {
        self.consumed.store(false, Ordering::SeqCst);
    }
}

impl<S: Scalar> Rereader<S> for Reuser<S> {
    fn forward(&self) -> Receiver<Batch<S>> {
        if self.consumed.swap(true, Ordering::SeqCst) {
            panic!("sequence already consumed; call reuse() before forwarding it again");
        }
        if self.evaluated.swap(true, Ordering::SeqCst) {
            self.inner.reread(0, None)
        } else {
            self.inner.forward()
        }
    }

    fn reread(&self, start: usize, end: Option<usize>) -> Receiver<Batch<S>> {
        self.inner.reread(start, end)
    }

    fn propagate(&self, upstream: Receiver<Batch<S>>, grad: &mut dyn GradSink<S>) {
        self.evaluated.store(true, Ordering::SeqCst);
        self.inner.propagate(upstream, grad)
    }
}

/// Feeds `upstream` (given in timestep order) to `seq.propagate` last timestep first.
pub fn propagate_reversed<S: Scalar>(
    seq: &dyn Rereader<S>,
    upstream: Vec<Batch<S>>,
    grad: &mut dyn GradSink<S>,
) {
    let (tx, rx) = sync_channel(1);
    thread::spawn(move || {
        for batch in upstream.into_iter().rev() {
            if tx.send(batch).is_err() {
                return;
            }
        }
    });
    seq.propagate(rx, grad);
}
