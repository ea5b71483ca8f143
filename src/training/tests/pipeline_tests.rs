//! End-to-end runs of the pipeline on the tiny checkpoint

use tempfile::TempDir;

use super::fixtures;
use crate::pipeline::Pipeline;
use crate::training::DatasetPaths;

#[tokio::test]
async fn test_single_epoch_run_writes_reports() {
    let dir = TempDir::new().unwrap();
    let config = fixtures::prepare_run(dir.path(), 1);
    let results_dir = config.report.results_dir.clone();

    let outcome = Pipeline::new(config).without_progress().run().await.unwrap();

    let summary = &outcome.summary;
    assert_eq!(summary.metrics.keys().copied().collect::<Vec<_>>(), vec![0]);
    assert!((0.0..=1.0).contains(&summary.metrics[&0].accuracy));
    assert_eq!((summary.train_size, summary.test_size, summary.eval_size), (2, 2, 2));
    assert_eq!(summary.dataset, "7");
    assert_eq!(summary.note, "fixture run");
    assert_eq!(summary.device, "cpu");

    assert_eq!(outcome.summary_path.parent(), Some(results_dir.as_path()));
    let file_name = outcome.summary_path.file_name().unwrap().to_string_lossy().to_string();
    assert!(file_name.ends_with("-conjunto7-1-epochs.json"));
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&outcome.summary_path).unwrap()).unwrap();
    assert!(json["metrics"]["0"]["accuracy"].is_f64());
    assert_eq!(json["train_size"], 2);
    assert_eq!(json["n_labels"], 2);

    assert_eq!(outcome.confusion_matrix.total(), 2);
    assert!(outcome.confusion_matrix.size() <= 2);
    let csv_path = results_dir.join("confusion_matrix_7_1_epochs.csv");
    assert_eq!(outcome.confusion_outputs.csv, csv_path);
    let csv = std::fs::read_to_string(&csv_path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert!(lines.len() <= 3);
    assert!(lines.iter().all(|line| line.split(',').count() <= 2));
    assert!(results_dir.join("confusion_matrix_7_1_epochs.png").is_file());
}

#[tokio::test]
async fn test_missing_partition_stops_before_training() {
    let dir = TempDir::new().unwrap();
    let config = fixtures::prepare_run(dir.path(), 1);
    let paths = DatasetPaths::resolve(&config.data.data_dir, &config.dataset);
    std::fs::remove_file(&paths.eval).unwrap();
    let results_dir = config.report.results_dir.clone();

    let err = Pipeline::new(config).without_progress().run().await.unwrap_err();

    let message = format!("{err:#}");
    assert!(message.starts_with("data load"));
    assert!(message.contains("Missing eval partition"));
    assert!(!results_dir.exists());
}

#[tokio::test]
async fn test_out_of_range_label_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = fixtures::prepare_run(dir.path(), 1);
    let paths = DatasetPaths::resolve(&config.data.data_dir, &config.dataset);
    fixtures::write_partition(&paths.test, &[("alpha", 0), ("beta", 5)]);

    let err = Pipeline::new(config).without_progress().run().await.unwrap_err();
    assert!(format!("{err:#}").starts_with("data load"));
}

#[tokio::test]
async fn test_training_failure_names_the_epoch() {
    let dir = TempDir::new().unwrap();
    let mut config = fixtures::prepare_run(dir.path(), 1);
    config.data.max_length = 2 * fixtures::MAX_POSITIONS;
    let paths = DatasetPaths::resolve(&config.data.data_dir, &config.dataset);
    let long = fixtures::overlong_text();
    fixtures::write_partition(&paths.train, &[(long.as_str(), 0), ("beta", 1)]);
    let results_dir = config.report.results_dir.clone();

    let err = Pipeline::new(config).without_progress().run().await.unwrap_err();
    assert!(format!("{err:#}").starts_with("epoch 0"));
    assert!(!results_dir.exists());
}

#[tokio::test]
async fn test_eval_failure_names_the_final_evaluation() {
    let dir = TempDir::new().unwrap();
    let mut config = fixtures::prepare_run(dir.path(), 1);
    config.data.max_length = 2 * fixtures::MAX_POSITIONS;
    let paths = DatasetPaths::resolve(&config.data.data_dir, &config.dataset);
    let long = fixtures::overlong_text();
    fixtures::write_partition(&paths.eval, &[("beta", 0), (long.as_str(), 1)]);
    let results_dir = config.report.results_dir.clone();

    let err = Pipeline::new(config).without_progress().run().await.unwrap_err();
    assert!(format!("{err:#}").starts_with("final evaluation"));
    assert!(!results_dir.exists());
}

#[tokio::test]
async fn test_unwritable_results_fail_the_final_report() {
    let dir = TempDir::new().unwrap();
    let config = fixtures::prepare_run(dir.path(), 1);
    std::fs::write(&config.report.results_dir, b"").unwrap();

    let err = Pipeline::new(config).without_progress().run().await.unwrap_err();
    let message = format!("{err:#}");
    assert!(message.starts_with("final report"));
    assert!(message.contains("is not a directory"));
}
