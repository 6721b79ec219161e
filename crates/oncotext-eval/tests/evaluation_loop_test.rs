//! End-to-end tests for the evaluation loop against a real checkpoint
//! directory, with a manual clock standing in for the 30 second poll.

mod common;

use common::{corrupt, examples, trainer_schedule, write_checkpoint, ScalarBuilder};
use oncotext_eval::{
    read_events, BestCheckpointConfig, CheckpointDir, CheckpointSource, EvalConfig, EvalError, EvaluationLoop,
    ManualClock, MetricGoal, ParameterSet, RestorePolicy, StopFlag, Termination, VecDataSource, EVENT_LOG_FILE,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn evaluator(config: EvalConfig, builder: &ScalarBuilder, clock: Arc<ManualClock>) -> EvaluationLoop {
    EvaluationLoop::new(config, Box::new(builder.clone()))
        .unwrap()
        .with_data(Arc::new(VecDataSource::new(examples(3))))
        .with_clock(clock)
}

fn continuous(ckpt: &Path, out: &Path, max_steps: Option<u64>) -> EvalConfig {
    let mut config = EvalConfig::new(ckpt, out);
    config.max_steps = max_steps;
    config
}

#[test]
fn test_continuous_mode_evaluates_each_checkpoint_once_in_order() {
    let ckpt = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_checkpoint(ckpt.path(), 10, 10.0);

    let clock = Arc::new(ManualClock::new().on_sleep(trainer_schedule(
        ckpt.path(),
        vec![None, Some((20, 20.0)), None, None, Some((30, 30.0))],
    )));
    let builder = ScalarBuilder::default();
    let mut eval = evaluator(continuous(ckpt.path(), out.path(), Some(30)), &builder, clock.clone());

    let report = eval.run().unwrap();

    assert_eq!(report.steps(), vec![10, 20, 30]);
    assert_eq!(report.termination, Termination::MaxSteps);
    assert_eq!(builder.built(), 3);
    assert_eq!(clock.sleeps(), 5);

    for pass in &report.passes {
        let summary = pass.summary.as_ref().unwrap();
        assert_eq!(summary.get("w"), Some(pass.step as f64));
        assert_eq!(summary.get("examples"), Some(3.0));
        assert_eq!(pass.batches, 3);
    }

    let records = read_events(&out.path().join(EVENT_LOG_FILE)).unwrap();
    let steps: Vec<u64> = records.iter().map(|r| r.step).collect();
    assert_eq!(steps, vec![10, 20, 30]);
    assert_eq!(records[1].values.get("w"), Some(20.0));
}

#[test]
fn test_max_steps_boundary_includes_first_step_at_or_past_limit() {
    for (max_steps, expected) in [(25, vec![10, 20, 30]), (20, vec![10, 20])] {
        let ckpt = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_checkpoint(ckpt.path(), 10, 1.0);

        let clock = Arc::new(ManualClock::new().on_sleep(trainer_schedule(
            ckpt.path(),
            vec![Some((20, 2.0)), Some((30, 3.0)), Some((40, 4.0))],
        )));
        let builder = ScalarBuilder::default();
        let report = evaluator(continuous(ckpt.path(), out.path(), Some(max_steps)), &builder, clock)
            .run()
            .unwrap();

        assert_eq!(report.steps(), expected, "max_steps = {max_steps}");
        assert_eq!(report.termination, Termination::MaxSteps);
    }
}

#[test]
fn test_backlog_of_checkpoints_jumps_to_latest() {
    let ckpt = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    for step in [10, 20, 30] {
        write_checkpoint(ckpt.path(), step, step as f32);
    }

    let builder = ScalarBuilder::default();
    let report = evaluator(continuous(ckpt.path(), out.path(), Some(25)), &builder, Arc::new(ManualClock::new()))
        .run()
        .unwrap();

    assert_eq!(report.steps(), vec![30]);
}

#[test]
fn test_non_continuous_without_checkpoint_fails_before_building_graph() {
    let ckpt = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let mut config = EvalConfig::new(ckpt.path(), out.path());
    config.infinite_loop = false;

    let builder = ScalarBuilder::default();
    let err = evaluator(config, &builder, Arc::new(ManualClock::new())).run().unwrap_err();

    match err {
        EvalError::NoCheckpoint { dir } => assert_eq!(dir, ckpt.path()),
        other => panic!("expected NoCheckpoint, got {other:?}"),
    }
    assert_eq!(builder.built(), 0);
}

#[test]
fn test_non_continuous_evaluates_latest_once() {
    let ckpt = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_checkpoint(ckpt.path(), 10, 1.0);
    write_checkpoint(ckpt.path(), 20, 2.0);
    let mut config = EvalConfig::new(ckpt.path(), out.path());
    config.infinite_loop = false;

    let clock = Arc::new(ManualClock::new());
    let report = evaluator(config, &ScalarBuilder::default(), clock.clone()).run().unwrap();

    assert_eq!(report.steps(), vec![20]);
    assert_eq!(report.termination, Termination::SinglePass);
    assert_eq!(clock.sleeps(), 0);
}

#[test]
fn test_restore_failure_aborts_by_default() {
    let ckpt = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    corrupt(&write_checkpoint(ckpt.path(), 10, 1.0));

    let err = evaluator(continuous(ckpt.path(), out.path(), None), &ScalarBuilder::default(), Arc::new(ManualClock::new()))
        .run()
        .unwrap_err();

    assert!(err.is_restore(), "unexpected error: {err}");
    assert!(err.to_string().contains("model.ckpt-10"));
    assert!(!out.path().join(EVENT_LOG_FILE).exists());
}

#[test]
fn test_incompatible_graph_is_restore_error() {
    let ckpt = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_checkpoint(ckpt.path(), 10, 1.0);

    let builder = ScalarBuilder { shape: vec![2], ..ScalarBuilder::default() };
    let err = evaluator(continuous(ckpt.path(), out.path(), None), &builder, Arc::new(ManualClock::new()))
        .run()
        .unwrap_err();

    assert!(err.to_string().contains("shape mismatch"));
}

#[test]
fn test_repoll_policy_skips_broken_checkpoint() {
    let ckpt = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    corrupt(&write_checkpoint(ckpt.path(), 10, 1.0));

    let mut config = continuous(ckpt.path(), out.path(), Some(20));
    config.restore_policy = RestorePolicy::Repoll;
    let clock = Arc::new(ManualClock::new().on_sleep(trainer_schedule(ckpt.path(), vec![Some((20, 2.0))])));

    let mut eval = evaluator(config, &ScalarBuilder::default(), clock);
    let report = eval.run().unwrap();

    assert_eq!(report.steps(), vec![20]);
    assert_eq!(eval.last_step(), Some(20));
}

#[test]
fn test_repoll_past_max_steps_terminates() {
    let ckpt = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    corrupt(&write_checkpoint(ckpt.path(), 30, 3.0));

    let mut config = continuous(ckpt.path(), out.path(), Some(20));
    config.restore_policy = RestorePolicy::Repoll;
    config.max_time_secs = Some(300);
    let clock = Arc::new(ManualClock::new());

    let report = evaluator(config, &ScalarBuilder::default(), clock.clone()).run().unwrap();

    assert!(report.passes.is_empty());
    assert_eq!(report.termination, Termination::MaxSteps);
    assert_eq!(clock.sleeps(), 0);
}

#[test]
fn test_max_time_stops_waiting() {
    let ckpt = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_checkpoint(ckpt.path(), 10, 1.0);

    let mut config = continuous(ckpt.path(), out.path(), None);
    config.max_time_secs = Some(90);
    let clock = Arc::new(ManualClock::new());

    let report = evaluator(config, &ScalarBuilder::default(), clock.clone()).run().unwrap();

    assert_eq!(report.steps(), vec![10]);
    assert_eq!(report.termination, Termination::MaxTime);
    assert_eq!(clock.sleeps(), 3);
}

#[test]
fn test_stop_flag_ends_the_wait() {
    let ckpt = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_checkpoint(ckpt.path(), 10, 1.0);

    let stop = StopFlag::new();
    let requested = stop.clone();
    let clock = Arc::new(ManualClock::new().on_sleep(move |_| requested.request()));

    let report = evaluator(continuous(ckpt.path(), out.path(), None), &ScalarBuilder::default(), clock)
        .with_stop_flag(stop)
        .run()
        .unwrap();

    assert_eq!(report.steps(), vec![10]);
    assert_eq!(report.termination, Termination::Stopped);
}

#[test]
fn test_best_checkpoint_follows_metric() {
    let ckpt = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_checkpoint(ckpt.path(), 10, 0.5);

    let mut config = continuous(ckpt.path(), out.path(), Some(30));
    config.best = Some(BestCheckpointConfig {
        metric: "w".to_string(),
        goal: MetricGoal::Maximize,
        name: "best_model.ckpt".to_string(),
    });
    let clock = Arc::new(ManualClock::new().on_sleep(trainer_schedule(
        ckpt.path(),
        vec![Some((20, 0.9)), Some((30, 0.7))],
    )));

    let report = evaluator(config, &ScalarBuilder::default(), clock).run().unwrap();
    let promoted: Vec<bool> = report.passes.iter().map(|p| p.promoted).collect();
    assert_eq!(promoted, vec![true, true, false]);

    let best_dir = CheckpointDir::new(out.path());
    let best = best_dir.pointed().unwrap().unwrap();
    assert_eq!(best.step(), 20);

    let mut params = ParameterSet::new();
    params.declare("w", vec![1]);
    best_dir.load(&best, &mut params).unwrap();
    assert!((params.get("w").unwrap().data()[0] - 0.9).abs() < f32::EPSILON);
}

#[test]
fn test_hook_can_stop_a_pass_early() {
    let ckpt = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_checkpoint(ckpt.path(), 10, 1.0);
    let mut config = EvalConfig::new(ckpt.path(), out.path());
    config.infinite_loop = false;

    let builder = ScalarBuilder { step_limit: Some(2), ..ScalarBuilder::default() };
    let report = EvaluationLoop::new(config, Box::new(builder))
        .unwrap()
        .with_data(Arc::new(VecDataSource::new(examples(5))))
        .run()
        .unwrap();

    assert_eq!(report.passes[0].batches, 2);
    assert_eq!(report.passes[0].summary.as_ref().unwrap().get("examples"), Some(2.0));
}

#[test]
fn test_pass_without_summary_records_nothing() {
    let ckpt = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_checkpoint(ckpt.path(), 10, 1.0);
    let mut config = EvalConfig::new(ckpt.path(), out.path());
    config.infinite_loop = false;

    let report = EvaluationLoop::new(config, Box::new(ScalarBuilder::default()))
        .unwrap()
        .with_data(Arc::new(VecDataSource::new(Vec::new())))
        .run()
        .unwrap();

    assert_eq!(report.passes[0].summary, None);
    assert!(!out.path().join(EVENT_LOG_FILE).exists());
}
