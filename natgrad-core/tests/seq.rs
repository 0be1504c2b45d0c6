use natgrad_core::*;
use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;

fn batches() -> Vec<Batch<f64>> {
    vec![
        Batch {
            present: vec![true, true],
            packed: vec![1.0, 2.0],
        },
        Batch {
            present: vec![true, false],
            packed: vec![3.0],
        },
        Batch {
            present: vec![false, false],
            packed: vec![],
        },
    ]
}

#[test]
fn test_batch_rows() {
    let batch = Batch {
        present: vec![false, true, true],
        packed: vec![1.0, 2.0, 3.0, 4.0],
    };
    assert_eq!(batch.num_present(), 2);
    assert_eq!(batch.row_size(), 2);
    assert_eq!(batch.rows().collect::<Vec<_>>(), vec![&[1.0, 2.0][..], &[3.0, 4.0][..]]);
    assert_eq!(batch.present_indices().collect::<Vec<_>>(), vec![1, 2]);

    let all = batches();
    let empty = &all[2];
    assert_eq!(empty.row_size(), 0);
    assert_eq!(empty.rows().count(), 0);
}

#[test]
fn test_tape_reads_in_order_and_replays() {
    let tape = MemTape::new(batches());
    let first: Vec<_> = tape.read_tape(0, None).iter().collect();
    let second: Vec<_> = tape.read_tape(0, None).iter().collect();
    assert_eq!(first, batches());
    assert_eq!(second, batches());
    let middle: Vec<_> = tape.read_tape(1, Some(2)).iter().collect();
    assert_eq!(middle, vec![batches()[1].clone()]);
}

#[test]
fn test_dropped_reader_stops_producer() {
    let tape = MemTape::new(batches());
    let rx = tape.read_tape(0, None);
    assert_eq!(rx.recv().unwrap(), batches()[0]);
    drop(rx);
    assert_eq!(tape.read_tape(2, None).iter().count(), 1);
}

#[test]
fn test_lift_tape_has_zero_tangents() {
    let lifted = LiftTape(MemTape::new(batches()));
    let first = lifted.read_tape(0, Some(1)).recv().unwrap();
    assert_eq!(first.packed, vec![Dual::constant(1.0), Dual::constant(2.0)]);
}

#[test]
fn test_reuser_replays_without_recomputing() {
    let mut rng = StdRng::from_seed([1u8; 32]);
    let block: Arc<dyn Block<f64>> = Arc::new(Linear::new(1, 1, &mut rng));
    let input = MemTape::new(vec![
        Batch {
            present: vec![true],
            packed: vec![2.0],
        };
        3
    ]);
    let outputs = Reuser::new(Bptt::full().apply(Box::new(TapeRereader(input)), block));
    let first: Vec<_> = outputs.forward().iter().collect();
    outputs.reuse();
    let second: Vec<_> = outputs.forward().iter().collect();
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
}

#[test]
#[should_panic(expected = "call reuse()")]
fn test_reuser_without_reuse_panics() {
    let outputs: Reuser<f64> = Reuser::new(Box::new(TapeRereader(MemTape::new(batches()))));
    for _ in outputs.forward() {}
    outputs.forward();
}

#[test]
fn test_propagate_reversed_sends_last_step_first() {
    struct Recorder(std::sync::Mutex<Vec<Vec<f64>>>);

    impl Rereader<f64> for Recorder {
        fn forward(&self) -> std::sync::mpsc::Receiver<Batch<f64>> {
            unreachable!()
        }
        fn reread(&self, _: usize, _: Option<usize>) -> std::sync::mpsc::Receiver<Batch<f64>> {
            unreachable!()
        }
        fn propagate(
            &self,
            upstream: std::sync::mpsc::Receiver<Batch<f64>>,
            _: &mut dyn GradSink<f64>,
        ) {
            let mut seen = self.0.lock().unwrap();
            seen.extend(upstream.iter().map(|b| b.packed));
        }
    }

    let recorder = Recorder(Default::default());
    let mut grad: Gradient = Gradient::new();
    propagate_reversed(&recorder, batches(), &mut grad);
    assert_eq!(
        *recorder.0.lock().unwrap(),
        vec![vec![], vec![3.0], vec![1.0, 2.0]]
    );
}
