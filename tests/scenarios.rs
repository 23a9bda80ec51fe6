//! End-to-end scenarios: assembled specification blobs driven by CSV
//! traces through the public API.

use std::cell::RefCell;
use std::io::{Cursor, Write};
use std::rc::Rc;

use mltl_sentinel::bytecode::SpecBuilder;
use mltl_sentinel::instruction::{MltlInstruction, Opcode};
use mltl_sentinel::trace::CsvTrace;
use mltl_sentinel::{tnt, Monitor, MonitorOptions, Status, Verdict};

struct SharedSink(Rc<RefCell<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Load a blob, stream `trace` (with an optional probability trace), and
/// collect callback verdicts plus the text sink output.
fn run(
    builder: &SpecBuilder,
    trace: &'static str,
    probabilities: Option<&'static str>,
) -> (Monitor, Vec<(u32, Verdict)>, String) {
    let mut monitor = Monitor::load(&builder.finish(), MonitorOptions::default()).unwrap();

    let verdicts = Rc::new(RefCell::new(Vec::new()));
    let sink = verdicts.clone();
    monitor.set_verdict_callback(move |id, v| sink.borrow_mut().push((id, v)));

    let text = Rc::new(RefCell::new(Vec::new()));
    monitor.set_output(Box::new(SharedSink(text.clone())));

    let mut reader = CsvTrace::new(Cursor::new(trace), true);
    if let Some(probabilities) = probabilities {
        reader = reader.with_probabilities(Cursor::new(probabilities));
    }
    while reader.load_next(&mut monitor).unwrap() == Status::Ok {
        monitor.step();
    }

    let collected = verdicts.borrow().clone();
    let text = String::from_utf8(text.borrow().clone()).unwrap();
    (monitor, collected, text)
}

fn verdict(time: u32, truth: bool) -> Verdict {
    Verdict { time, truth }
}

/// Scenario 1: a bare atom, always true.  One verdict per step on the
/// sinks, a single compacted record in the queue.
#[test]
fn trivial_always_true_atom() {
    let mut b = SpecBuilder::new("a0");
    b.config(MltlInstruction::configure_queue(0, 8, 0))
        .config(MltlInstruction::configure_queue(1, 8, 0))
        .instruction(MltlInstruction::load(0, 0))
        .instruction(MltlInstruction::ret(0, 0, 1));

    let (monitor, verdicts, text) = run(&b, "1\n1\n1\n", None);
    assert_eq!(
        verdicts,
        vec![
            (0, verdict(0, true)),
            (0, verdict(1, true)),
            (0, verdict(2, true)),
        ]
    );
    assert_eq!(text, "0:0,T\n0:1,T\n0:2,T\n");
    // The whole run compacted into one trailing record.
    assert_eq!(monitor.arena.slot(0, 0), tnt(2, true));
    assert_eq!(monitor.arena.block(0).write, 1);
}

/// Scenario 2: `G[0,2] a0` over 1,1,1,0,1.  Satisfied at 0 after the
/// third row; the false row falsifies the run through t=3 in one record.
#[test]
fn globally_interval() {
    let mut b = SpecBuilder::new("G[0,2] a0");
    b.config(MltlInstruction::configure_queue(0, 8, 0))
        .config(MltlInstruction::configure_queue(1, 12, 0))
        .config(MltlInstruction::configure_temporal(1, 0, 2))
        .config(MltlInstruction::configure_queue(2, 8, 0))
        .instruction(MltlInstruction::load(0, 0))
        .instruction(MltlInstruction::unary(Opcode::Globally, 0, 1))
        .instruction(MltlInstruction::ret(1, 0, 2));

    let (_, verdicts, _) = run(&b, "1\n1\n1\n0\n1\n", None);
    assert_eq!(
        verdicts,
        vec![(0, verdict(0, true)), (0, verdict(3, false))]
    );
}

/// Scenario 3: `a0 U[0,3] a1`.
#[test]
fn until_operator() {
    let mut b = SpecBuilder::new("a0 U[0,3] a1");
    b.config(MltlInstruction::configure_queue(0, 8, 0))
        .config(MltlInstruction::configure_queue(1, 8, 0))
        .config(MltlInstruction::configure_queue(2, 12, 0))
        .config(MltlInstruction::configure_temporal(2, 0, 3))
        .config(MltlInstruction::configure_queue(3, 8, 0))
        .instruction(MltlInstruction::load(0, 0))
        .instruction(MltlInstruction::load(1, 1))
        .instruction(MltlInstruction::binary(Opcode::Until, 0, 1, 2))
        .instruction(MltlInstruction::ret(2, 0, 3));

    let (_, verdicts, _) = run(&b, "1,0\n1,0\n1,1\n0,0\n", None);
    assert_eq!(
        verdicts,
        vec![(0, verdict(2, true)), (0, verdict(3, false))]
    );
}

/// Scenario 4: `!a0` over 0,1,0.
#[test]
fn negation() {
    let mut b = SpecBuilder::new("!a0");
    b.config(MltlInstruction::configure_queue(0, 8, 0))
        .config(MltlInstruction::configure_queue(1, 8, 0))
        .config(MltlInstruction::configure_queue(2, 8, 0))
        .instruction(MltlInstruction::load(0, 0))
        .instruction(MltlInstruction::unary(Opcode::Not, 0, 1))
        .instruction(MltlInstruction::ret(1, 0, 2));

    let (_, verdicts, text) = run(&b, "0\n1\n0\n", None);
    assert_eq!(
        verdicts,
        vec![
            (0, verdict(0, true)),
            (0, verdict(1, false)),
            (0, verdict(2, true)),
        ]
    );
    assert_eq!(text, "0:0,T\n0:1,F\n0:2,T\n");
}

/// Scenario 5: `a0 & G[0,1] a1` — the conjunction waits one step for the
/// lagged side, then reports the falsified run through t=2.
#[test]
fn and_with_lag() {
    let mut b = SpecBuilder::new("a0 & G[0,1] a1");
    b.config(MltlInstruction::configure_queue(0, 8, 0))
        .config(MltlInstruction::configure_queue(1, 8, 0))
        .config(MltlInstruction::configure_queue(2, 12, 0))
        .config(MltlInstruction::configure_temporal(2, 0, 1))
        .config(MltlInstruction::configure_queue(3, 8, 0))
        .config(MltlInstruction::configure_queue(4, 8, 0))
        .instruction(MltlInstruction::load(0, 0))
        .instruction(MltlInstruction::load(1, 1))
        .instruction(MltlInstruction::unary(Opcode::Globally, 1, 2))
        .instruction(MltlInstruction::binary(Opcode::And, 0, 2, 3))
        .instruction(MltlInstruction::ret(3, 0, 4));

    let (_, verdicts, _) = run(&b, "1,1\n1,1\n1,0\n", None);
    assert_eq!(
        verdicts,
        vec![(0, verdict(0, true)), (0, verdict(2, false))]
    );
}

/// Scenario 6: `G[0,2] a0` under a deadline with a two-mode forecast.
/// The single real row cannot decide t=0, so the monitor speculates and
/// emits a tagged verdict.
#[test]
fn predicted_globally() {
    let mut b = SpecBuilder::new("G[0,2] a0 with deadline");
    b.config(MltlInstruction::configure_queue(0, 8, 0))
        .config(MltlInstruction::configure_queue(1, 12, 0))
        .config(MltlInstruction::configure_temporal(1, 0, 2))
        .config(MltlInstruction::configure_queue(2, 12, 0))
        .config(MltlInstruction::configure_predict(2, 0, 2))
        .instruction(MltlInstruction::load(0, 0))
        .instruction(MltlInstruction::unary(Opcode::Globally, 0, 1))
        .instruction(MltlInstruction::ret(1, 0, 2));

    let (_, verdicts, text) = run(&b, "1\n", Some("1.0,|,0.5,0.5,|,0.5,0.5\n"));
    assert_eq!(verdicts, vec![(0, verdict(0, true))]);
    assert_eq!(text, "0:0,T (Predicted at time stamp 0)\n");
}

/// Predictions never leak into later real verdicts: feeding the real rows
/// after a speculative step yields the same stream a non-predictive
/// monitor would produce for the remaining time steps.
#[test]
fn real_data_after_prediction_stays_clean() {
    let mut b = SpecBuilder::new("G[0,2] a0 with deadline");
    b.config(MltlInstruction::configure_queue(0, 8, 0))
        .config(MltlInstruction::configure_queue(1, 12, 0))
        .config(MltlInstruction::configure_temporal(1, 0, 2))
        .config(MltlInstruction::configure_queue(2, 12, 0))
        .config(MltlInstruction::configure_predict(2, 1, 2))
        .instruction(MltlInstruction::load(0, 0))
        .instruction(MltlInstruction::unary(Opcode::Globally, 0, 1))
        .instruction(MltlInstruction::ret(1, 0, 2));

    // Deadline 1: a verdict becomes due one step behind real time, so the
    // monitor guesses at t=1 and t=2 from the optimistic forecast.  The
    // real false at t=3 then falsifies 1..3 from real data alone — the
    // earlier speculation never contaminates it.
    let trace = "1\n1\n1\n0\n";
    let probs = "1.0,|,0.5,0.5,|,0.5,0.5\n1.0,|,0.5,0.5,|,0.5,0.5\n1.0,|,0.5,0.5,|,0.5,0.5\n1.0,|,0.5,0.5,|,0.5,0.5\n";
    let (_, verdicts, text) = run(&b, trace, Some(probs));

    assert_eq!(
        verdicts,
        vec![
            (0, verdict(0, true)),
            (0, verdict(1, true)),
            (0, verdict(3, false)),
        ]
    );
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("Predicted at time stamp 1"));
    assert!(lines[1].contains("Predicted at time stamp 2"));
    assert_eq!(lines[2], "0:3,F");
}

/// Verdicts survive the trip through on-disk trace files.
#[test]
fn reads_traces_from_disk() {
    let mut b = SpecBuilder::new("!a0");
    b.config(MltlInstruction::configure_queue(0, 8, 0))
        .config(MltlInstruction::configure_queue(1, 8, 0))
        .config(MltlInstruction::configure_queue(2, 8, 0))
        .instruction(MltlInstruction::load(0, 0))
        .instruction(MltlInstruction::unary(Opcode::Not, 0, 1))
        .instruction(MltlInstruction::ret(1, 0, 2));

    let dir = std::env::temp_dir();
    let path = dir.join(format!("mltl-sentinel-trace-{}.csv", std::process::id()));
    std::fs::write(&path, "# a0\n0\n1\n").unwrap();

    let mut monitor = Monitor::load(&b.finish(), MonitorOptions::default()).unwrap();
    let verdicts = Rc::new(RefCell::new(Vec::new()));
    let sink = verdicts.clone();
    monitor.set_verdict_callback(move |id, v| sink.borrow_mut().push((id, v)));

    let mut reader = CsvTrace::open(&path, None, true).unwrap();
    while reader.load_next(&mut monitor).unwrap() == Status::Ok {
        monitor.step();
    }
    std::fs::remove_file(&path).ok();

    assert_eq!(
        *verdicts.borrow(),
        vec![(0, verdict(0, true)), (0, verdict(1, false))]
    );
}
