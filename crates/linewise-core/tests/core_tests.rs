use linewise_core::{
    AnalyzeError, ChunkData, FileAnalysis, PoolConfig, StreamConfig, Task, TaskError,
    TaskResult, TaskType, TextEncoding, WorkerStats,
};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_chunk_roundtrip_keeps_line_range() {
    let chunk = ChunkData {
        index: 0,
        start_line: 0,
        end_line: 2,
        lines: vec!["fn main() {".into(), "}".into()],
        byte_offset: 0,
        size: 13,
    };

    let json = serde_json::to_string(&chunk).unwrap();
    assert!(json.contains("\"startLine\":0"));
    assert!(json.contains("\"byteOffset\":0"));

    let back: ChunkData = serde_json::from_str(&json).unwrap();
    assert_eq!(back, chunk);
}

#[test]
fn test_file_analysis_throughput() {
    let analysis = FileAnalysis {
        file_path: PathBuf::from("big.log"),
        lines: 1000,
        size: 2_000_000,
        chunks: 31,
        duration: Duration::from_secs(2),
        memory_used: 4096,
    };
    assert_eq!(analysis.bytes_per_second(), 1_000_000.0);

    let instant = FileAnalysis {
        duration: Duration::ZERO,
        ..analysis
    };
    assert_eq!(instant.bytes_per_second(), 0.0);
}

#[test]
fn test_task_construction() {
    let task = Task::new("a-1", TaskType::AnalyzeFile, json!({ "path": "/tmp/a" }));
    assert_eq!(task.task_type, "analyze-file");
    assert_eq!(task.kind().unwrap(), TaskType::AnalyzeFile);

    let wire = serde_json::to_value(&task).unwrap();
    assert_eq!(wire["type"], "analyze-file");
    assert_eq!(wire["id"], "a-1");
}

#[test]
fn test_task_without_data_defaults_to_null() {
    let task: Task = serde_json::from_str(r#"{"id":"x","type":"parse-ast"}"#).unwrap();
    assert!(task.data.is_null());
}

#[test]
fn test_task_result_ok() {
    let result = TaskResult::ok("a-1", json!({ "lines": 3 }), Duration::from_millis(7), 0);
    assert!(result.success);
    assert!(result.error.is_none());
    assert!(!result.is_timeout());
    assert_eq!(result.data.unwrap()["lines"], 3);
}

#[test]
fn test_task_error_messages() {
    let err = TaskError::UnknownTaskType {
        task_type: "frobnicate".into(),
    };
    assert!(err.to_string().contains("frobnicate"));

    let err = TaskError::WorkerExited { worker_id: 3 };
    assert!(err.to_string().contains('3'));

    let err: TaskError = serde_json::from_str::<serde_json::Value>("{")
        .unwrap_err()
        .into();
    assert!(matches!(err, TaskError::InvalidPayload { .. }));
}

#[test]
fn test_analyze_error_other_io() {
    let err = AnalyzeError::io(
        "/dev/thing",
        std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"),
    );
    assert!(matches!(err, AnalyzeError::Io { .. }));
    assert!(err.to_string().contains("/dev/thing"));
}

#[test]
fn test_worker_stats_serialization() {
    let stats = WorkerStats {
        worker_id: 1,
        memory_used: 1 << 20,
        cpu_seconds: 0.5,
        sampled_at: chrono::Utc::now(),
    };
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["workerId"], 1);
    assert_eq!(json["memoryUsed"], 1 << 20);
    assert!(json["sampledAt"].is_string());
}

#[test]
fn test_configs_from_json() {
    let stream: StreamConfig =
        serde_json::from_value(json!({ "chunkSize": 512, "encoding": "latin1" })).unwrap();
    assert_eq!(stream.chunk_size, 512);
    assert_eq!(stream.encoding, TextEncoding::Latin1);

    let pool: PoolConfig =
        serde_json::from_value(json!({ "workers": 2, "defaultTimeout": 1500 })).unwrap();
    assert_eq!(pool.worker_count(), 2);
    assert_eq!(pool.default_timeout, Duration::from_millis(1500));
    assert_eq!(pool.stats_interval, Duration::from_secs(5));
}
