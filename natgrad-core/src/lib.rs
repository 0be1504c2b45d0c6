pub mod action_space;
pub mod block;
pub mod bptt;
pub mod gradient;
pub mod judger;
pub mod numeric;
pub mod param;
pub mod regularizer;
pub mod rollout;
pub mod seq;

pub use action_space::{Entropyer, Gaussian, KLer, LogProber, NaturalActionSpace, Softmax};
pub use block::{Block, Linear, Policy, Rnn};
pub use bptt::{ApplyPolicy, Bptt, BpttRereader};
pub use gradient::Gradient;
pub use judger::{ActionJudger, TotalJudger};
pub use numeric::{Dual, Scalar};
pub use param::{Param, ParamId};
pub use regularizer::{EntropyReg, Regularizer};
pub use rollout::{Rollout, RolloutSet};
pub use seq::{
    propagate_reversed, Batch, GradSink, LiftTape, MemTape, Rereader, Reuser, Tape, TapeRereader,
    TapeWriter,
};
