//! End-to-end runs of the training pipeline

use dagline_cli::{Pipeline, PipelineConfig, task_ids, unlock};
use dagline_core::{CoreError, CoreResult, RunStatus, TaskId, TaskState};
use dagline_notify::{MemoryTrigger, RecordingNotifier, SpoolTrigger, TriggerRequest, TriggerSink};
use dagline_runtime::RunLock;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn tid(name: &str) -> TaskId {
    TaskId::new(name).unwrap()
}

fn config_in(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.artifact.dir = dir.join("artifacts");
    config.trigger.spool_dir = dir.join("spool");
    config
}

struct Harness {
    pipeline: Pipeline,
    notifier: Arc<RecordingNotifier>,
    trigger: Arc<MemoryTrigger>,
}

fn harness(config: PipelineConfig) -> Harness {
    let notifier = RecordingNotifier::new();
    let trigger = MemoryTrigger::new();
    let pipeline = Pipeline::new(config, notifier.clone(), trigger.clone()).unwrap();
    Harness {
        pipeline,
        notifier,
        trigger,
    }
}

#[test]
fn test_full_run_on_synthetic_data() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(config_in(dir.path()));

    let report = h.pipeline.run().unwrap();
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.tasks.len(), 8);
    assert_eq!(report.metrics.tasks_succeeded, 8);

    let split = h.pipeline.split().unwrap();
    assert_eq!(split.train_len(), 80);
    assert_eq!(split.test_len(), 20);

    let evaluation = h.pipeline.evaluation().unwrap();
    assert_eq!(evaluation.test_rows, 20);
    assert_eq!(evaluation.predictions.len(), 20);
    assert!(evaluation.accuracy > 0.5, "accuracy {}", evaluation.accuracy);

    assert!(h.pipeline.store().exists("model.sav"));

    let requests = h.trigger.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].target_pipeline.as_str(), "Airflow_project_Flask");
    assert_eq!(requests[0].source_run_id, report.run_id);
    assert_eq!(requests[0].conf["message"], "Data from upstream DAG");

    // the notification itself, then the success hook on send_email
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].subject, "Notification from Airflow_project");
    assert_eq!(sent[0].to, "pipeline-owner@example.com");
    assert!(sent[1].subject.contains("send_email"));
    assert!(sent[1].subject.contains("Task Succeeded"));
}

#[test]
fn test_split_covers_every_row() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(config_in(dir.path()));
    h.pipeline.run().unwrap();

    let split = h.pipeline.split().unwrap();
    assert!(!split.x_train.is_empty());
    assert!(!split.x_test.is_empty());
    assert!(!split.y_train.is_empty());
    assert!(!split.y_test.is_empty());
    assert_eq!(split.x_train.len() + split.x_test.len(), 100);
    assert_eq!(split.y_train.len() + split.y_test.len(), 100);
}

#[test]
fn test_two_runs_predict_identically() {
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();

    let mut first = harness(config_in(first_dir.path()));
    let mut second = harness(config_in(second_dir.path()));
    first.pipeline.run().unwrap();
    second.pipeline.run().unwrap();

    let a = first.pipeline.evaluation().unwrap();
    let b = second.pipeline.evaluation().unwrap();
    assert_eq!(a.predictions, b.predictions);
    assert_eq!(a.accuracy, b.accuracy);
    assert_eq!(
        first.pipeline.split().unwrap().test_indices,
        second.pipeline.split().unwrap().test_indices
    );
}

#[test]
fn test_rerun_reuses_artifact_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(config_in(dir.path()));

    h.pipeline.run().unwrap();
    let first = h.pipeline.evaluation().unwrap();
    h.pipeline.run().unwrap();
    let second = h.pipeline.evaluation().unwrap();

    assert_eq!(first.predictions, second.predictions);
    let files: Vec<String> = fs::read_dir(dir.path().join("artifacts"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files, vec!["model.sav"]);
}

#[test]
fn test_trigger_fires_after_load_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(config_in(dir.path()));
    h.pipeline.inject_failure(task_ids::LOAD_DATA).unwrap();

    let report = h.pipeline.run().unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.state_of(&tid(task_ids::LOAD_DATA)), Some(TaskState::Failed));
    assert_eq!(
        report.state_of(&tid(task_ids::LOAD_MODEL)),
        Some(TaskState::UpstreamFailed)
    );
    assert_eq!(
        report.state_of(&tid(task_ids::SEND_EMAIL)),
        Some(TaskState::UpstreamFailed)
    );
    assert_eq!(report.state_of(&tid(task_ids::TRIGGER)), Some(TaskState::Success));

    assert_eq!(h.trigger.requests().len(), 1);
    assert!(h.notifier.sent().is_empty());
    assert!(!h.pipeline.store().exists("model.sav"));
}

#[test]
fn test_failed_build_leaves_no_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(config_in(dir.path()));
    h.pipeline.inject_failure(task_ids::BUILD_MODEL).unwrap();

    let report = h.pipeline.run().unwrap();
    assert_eq!(report.state_of(&tid(task_ids::BUILD_MODEL)), Some(TaskState::Failed));
    assert!(!h.pipeline.store().path("model.sav").exists());
    assert!(h.pipeline.evaluation().is_none());
    assert_eq!(report.state_of(&tid(task_ids::TRIGGER)), Some(TaskState::Success));
}

#[derive(Default)]
struct RefusingSink {
    calls: AtomicUsize,
}

impl TriggerSink for RefusingSink {
    fn name(&self) -> &str {
        "refusing"
    }

    fn fire(&self, _request: &TriggerRequest) -> CoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CoreError::Internal {
            message: "downstream unavailable".to_string(),
        })
    }
}

#[test]
fn test_trigger_fires_once_despite_retries() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.pipeline.retries = 2;
    let sink = Arc::new(RefusingSink::default());
    let mut pipeline = Pipeline::new(config, RecordingNotifier::new(), sink.clone()).unwrap();

    let report = pipeline.run().unwrap();
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    let trigger = report.task(&tid(task_ids::TRIGGER)).unwrap();
    assert_eq!(trigger.state, TaskState::Failed);
    assert_eq!(trigger.attempts, 1);
    assert_eq!(report.state_of(&tid(task_ids::SEND_EMAIL)), Some(TaskState::Success));
}

#[test]
fn test_success_mail_can_be_turned_off() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.notify.on_success = false;
    let mut h = harness(config);

    assert!(h.pipeline.run().unwrap().is_success());
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Notification from Airflow_project");
}

#[test]
fn test_failed_notification_is_contained() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(config_in(dir.path()));
    h.notifier.set_failing(true);

    let report = h.pipeline.run().unwrap();
    let email = report.task(&tid(task_ids::SEND_EMAIL)).unwrap();
    assert_eq!(email.state, TaskState::Failed);
    assert_eq!(email.hook_errors.len(), 1);
    assert_eq!(report.metrics.hook_failures, 1);

    // the model path is unaffected
    assert_eq!(report.state_of(&tid(task_ids::LOAD_MODEL)), Some(TaskState::Success));
    assert_eq!(report.state_of(&tid(task_ids::TRIGGER)), Some(TaskState::Success));
}

#[test]
fn test_active_run_blocks_second_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let artifact_dir = config.artifact.dir.clone();
    let pipeline_id = config.pipeline_id().unwrap();
    let mut h = harness(config);

    let lock = RunLock::acquire(&artifact_dir, &pipeline_id).unwrap();
    let err = h.pipeline.run().unwrap_err();
    assert!(matches!(err, CoreError::AlreadyExists { .. }));
    assert!(h.trigger.requests().is_empty());

    drop(lock);
    assert!(h.pipeline.run().unwrap().is_success());
    assert!(!RunLock::lock_path(&artifact_dir, &pipeline_id).exists());
}

#[test]
fn test_unlock_clears_stale_lock() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let lock_path = RunLock::lock_path(&config.artifact.dir, &config.pipeline_id().unwrap());
    fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
    // left behind by a run that aborted
    fs::write(&lock_path, "4242\n").unwrap();

    let mut h = harness(config.clone());
    let err = h.pipeline.run().unwrap_err();
    let message = err.to_string();
    assert!(message.contains(&lock_path.display().to_string()), "{}", message);
    assert!(message.contains("pid 4242"), "{}", message);

    assert!(unlock(&config).unwrap());
    assert!(!lock_path.exists());
    assert!(!unlock(&config).unwrap());
    assert!(h.pipeline.run().unwrap().is_success());
}

#[test]
fn test_csv_input() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("flowers.csv");
    let mut text = String::from("petal_length,petal_width,species\n");
    for i in 0..30 {
        let jitter = f64::from(i % 5) * 0.1;
        if i == 7 {
            text.push_str(&format!("NA,{:.2},setosa\n", 0.2 + jitter));
        } else {
            text.push_str(&format!("{:.2},{:.2},setosa\n", 1.0 + jitter, 0.2 + jitter));
        }
        text.push_str(&format!("{:.2},{:.2},virginica\n", 5.5 + jitter, 2.0 + jitter));
    }
    fs::write(&csv, text).unwrap();

    let mut config = config_in(dir.path());
    config.data.path = Some(csv);
    config.data.label_column = "species".to_string();
    let mut h = harness(config);

    let report = h.pipeline.run().unwrap();
    assert!(report.is_success(), "{:?}", report.tasks);

    let split = h.pipeline.split().unwrap();
    assert_eq!(split.test_len(), 12);
    assert_eq!(split.train_len(), 48);
    assert_eq!(h.pipeline.evaluation().unwrap().accuracy, 1.0);
}

#[test]
fn test_missing_csv_fails_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.data.path = Some(dir.path().join("absent.csv"));
    let mut h = harness(config);

    let report = h.pipeline.run().unwrap();
    let load = report.task(&tid(task_ids::LOAD_DATA)).unwrap();
    assert_eq!(load.state, TaskState::Failed);
    assert!(load.error.as_deref().unwrap_or_default().contains("absent.csv"));
}

#[test]
fn test_spooled_trigger_request() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let spool_dir = config.trigger.spool_dir.clone();

    let mut pipeline = Pipeline::from_config(config).unwrap();
    let report = pipeline.run().unwrap();
    assert!(report.is_success());

    let requests = SpoolTrigger::new(spool_dir).list().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].source_pipeline.as_str(), "Airflow_project");
    assert_eq!(Some(&requests[0]), pipeline.trigger_request().as_deref());
}

#[test]
fn test_report_json_written() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(config_in(dir.path()));
    let report = h.pipeline.run().unwrap();

    let path = dir.path().join("report.json");
    fs::write(&path, report.to_json_pretty().unwrap()).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();

    assert_eq!(value["status"], "success");
    assert_eq!(value["tasks"][0]["task_id"], task_ids::OWNER);
    assert_eq!(value["tasks"].as_array().unwrap().len(), 8);
}

#[test]
fn test_config_file_drives_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dagline.toml");
    let text = format!(
        r#"
[pipeline]
id = "nightly_training"

[data]
synthetic_rows = 50
seed = 7

[split]
test_fraction = 0.3
seed = 7

[artifact]
dir = "{}"
name = "nightly.sav"
"#,
        dir.path().join("artifacts").display()
    );
    fs::write(&path, text).unwrap();

    let config = PipelineConfig::load(&path).unwrap();
    let mut h = harness(config);
    let report = h.pipeline.run().unwrap();

    assert_eq!(report.pipeline_id.as_str(), "nightly_training");
    assert_eq!(h.pipeline.split().unwrap().test_len(), 15);
    assert!(h.pipeline.store().exists("nightly.sav"));
}
