use std::{
    sync::Arc,
    time::Duration,
};

use chrono::NaiveDate;
use serde_json::json;

use geotask::{
    error::{
        RemoteJobsFailed,
        TaskError,
    },
    inputs::parse_inputs,
    remote::{
        backend::{
            ExportDestination, PropertyValue, RemoteBackend,
        },
        date_to_millis,
        memory::{
            JobScript, MemoryBackend,
        },
        AssetInfo, AssetKind, ImageExport, InputProblem, JobState, Orchestrator, TIMESTAMP_PROPERTY,
    },
    transfer::LocalObjectStore,
    TaskOptions,
};

const ROOT: &str = "projects/HII/v1";

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn millis(y: i32, m: u32, d: u32) -> i64 {
    date_to_millis(day(y, m, d))
}

fn orchestrator(backend: &Arc<MemoryBackend>) -> Orchestrator {
    let options = TaskOptions::default().with_taskdate(day(2024, 1, 10));
    Orchestrator::new(backend.clone(), ROOT, &options).unwrap()
}

fn image(id: &str, time_start: i64) -> AssetInfo {
    AssetInfo::new(id, AssetKind::Image).with_time_start(time_start)
}

fn expect_jobs_failed(result: Result<(), TaskError>) -> RemoteJobsFailed {
    match result {
        Err(TaskError::RemoteJobs(e)) => e,
        other => panic!("expected failed remote jobs, got {other:?}"),
    }
}

#[tokio::test]
async fn every_stale_input_is_reported() {
    let backend = Arc::new(MemoryBackend::new());
    for name in ["a", "b", "c"] {
        backend.insert_asset(image(&format!("{ROOT}/source/{name}"), millis(2015, 6, 1)));
    }
    backend.insert_asset(image(&format!("{ROOT}/source/fresh"), millis(2023, 6, 1)));
    let inputs = parse_inputs(
        r#"
        [inputs.a]
        remote_type = "Image"
        remote_path = "projects/HII/v1/source/a"
        maxage = 2

        [inputs.b]
        remote_type = "Image"
        remote_path = "projects/HII/v1/source/b"
        maxage = 2

        [inputs.c]
        remote_type = "Image"
        remote_path = "projects/HII/v1/source/c"
        maxage = 2

        [inputs.fresh]
        remote_type = "Image"
        remote_path = "projects/HII/v1/source/fresh"
        maxage = 2
        "#,
    )
    .unwrap();

    let mut remote = orchestrator(&backend).with_inputs(inputs);
    let failures = remote.check_inputs().await.unwrap();
    assert_eq!(failures.len(), 3);
    let names: Vec<&str> = failures.iter().map(|f| f.input.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    for failure in failures {
        assert_eq!(failure.problem, InputProblem::TooOld { age: 8, maxage: 2 });
    }
}

#[tokio::test]
async fn future_dated_image_fails_and_same_day_passes() {
    let backend = Arc::new(MemoryBackend::new());
    backend.insert_asset(image(&format!("{ROOT}/source/tomorrow"), millis(2024, 1, 11)));
    backend.insert_asset(image(
        &format!("{ROOT}/source/tonight"),
        millis(2024, 1, 10) + 23 * 3_600_000,
    ));
    let inputs = parse_inputs(
        r#"
        [inputs.tomorrow]
        remote_type = "Image"
        remote_path = "projects/HII/v1/source/tomorrow"

        [inputs.tonight]
        remote_type = "Image"
        remote_path = "projects/HII/v1/source/tonight"
        maxage = 0
        "#,
    )
    .unwrap();

    let mut remote = orchestrator(&backend).with_inputs(inputs);
    let failures = remote.check_inputs().await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].input, "tomorrow");
    assert_eq!(failures[0].problem, InputProblem::FromTheFuture);
}

#[tokio::test]
async fn collection_candidate_is_latest_image_before_next_midnight() {
    let backend = Arc::new(MemoryBackend::new());
    let ic = format!("{ROOT}/source/popdens");
    backend.insert_asset(AssetInfo::new(&ic, AssetKind::ImageCollection));
    backend.insert_asset(image(&format!("{ic}/old"), millis(2020, 1, 1)));
    backend.insert_asset(image(&format!("{ic}/noon"), millis(2024, 1, 10) + 12 * 3_600_000));
    backend.insert_asset(image(&format!("{ic}/midnight"), millis(2024, 1, 11)));
    backend.insert_asset(AssetInfo::new(format!("{ic}/undated"), AssetKind::Image));

    let remote = orchestrator(&backend);
    let candidate = remote.most_recent_image(&ic).await.unwrap().unwrap();
    assert_eq!(candidate.id, format!("{ic}/noon"));
}

#[tokio::test]
async fn collection_with_only_future_images_has_no_timestamp() {
    let backend = Arc::new(MemoryBackend::new());
    let ic = format!("{ROOT}/source/future");
    backend.insert_asset(AssetInfo::new(&ic, AssetKind::ImageCollection));
    backend.insert_asset(image(&format!("{ic}/one"), millis(2025, 1, 1)));
    let inputs = parse_inputs(
        r#"
        [inputs.future]
        remote_type = "ImageCollection"
        remote_path = "projects/HII/v1/source/future"
        "#,
    )
    .unwrap();

    let mut remote = orchestrator(&backend).with_inputs(inputs);
    let failures = remote.check_inputs().await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].problem, InputProblem::NoTimestamp);
}

#[tokio::test]
async fn static_and_table_inputs_only_need_to_exist() {
    let backend = Arc::new(MemoryBackend::new());
    backend.insert_asset(AssetInfo::new(format!("{ROOT}/source/dem"), AssetKind::Image));
    backend.insert_asset(AssetInfo::new(format!("{ROOT}/source/ranges"), AssetKind::Table));
    let inputs = parse_inputs(
        r#"
        [inputs.dem]
        remote_type = "Image"
        remote_path = "projects/HII/v1/source/dem"
        maxage = 0
        static = true

        [inputs.ranges]
        remote_type = "FeatureCollection"
        remote_path = "projects/HII/v1/source/ranges"
        maxage = 0

        [inputs.gone]
        remote_type = "Image"
        remote_path = "projects/HII/v1/source/gone"
        static = true

        [inputs.untyped]
        remote_path = "projects/HII/v1/source/dem"

        [inputs.local]
        maxage = 1
        "#,
    )
    .unwrap();

    let mut remote = orchestrator(&backend).with_inputs(inputs);
    let failures = remote.check_inputs().await.unwrap();
    let problems: Vec<(&str, &InputProblem)> = failures
        .iter()
        .map(|f| (f.input.as_str(), &f.problem))
        .collect();
    assert_eq!(problems, vec![
        ("gone", &InputProblem::NotFound),
        ("untyped", &InputProblem::MissingType),
    ]);
}

#[tokio::test]
async fn fullyear_collection_searches_back_up_to_maxage() {
    let backend = Arc::new(MemoryBackend::new());
    let ic = format!("{ROOT}/source/landcover");
    backend.insert_asset(AssetInfo::new(&ic, AssetKind::ImageCollection));
    backend.insert_asset(image(&format!("{ic}/a"), millis(2022, 1, 1)));
    backend.insert_asset(image(&format!("{ic}/b"), millis(2022, 12, 31)));
    backend.insert_asset(image(&format!("{ic}/c"), millis(2021, 6, 1)));

    let remote = orchestrator(&backend);
    assert!(remote.most_recent_fullyear_collection(&ic, 1).await.unwrap().is_none());

    let (images, start) = remote.most_recent_fullyear_collection(&ic, 2).await.unwrap().unwrap();
    assert_eq!(start, day(2022, 1, 1));
    let ids: Vec<String> = images.into_iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![format!("{ic}/a"), format!("{ic}/b")]);
}

#[tokio::test]
async fn latest_dated_table_not_after_taskdate() {
    let backend = Arc::new(MemoryBackend::new());
    let dir = format!("{ROOT}/ranges");
    backend.insert_asset(AssetInfo::new(&dir, AssetKind::Folder));
    for date in ["2023-05-01", "2024-01-10", "2024-02-01"] {
        backend.insert_asset(AssetInfo::new(format!("{dir}/ranges_{date}"), AssetKind::Table));
    }
    backend.insert_asset(AssetInfo::new(format!("{dir}/raster_2024-01-09"), AssetKind::Image));

    let remote = orchestrator(&backend);
    let (id, date) = remote.most_recent_feature_collection(&dir).await.unwrap().unwrap();
    assert_eq!(id, format!("{dir}/ranges_2024-01-10"));
    assert_eq!(date, day(2024, 1, 10));
    assert!(remote
        .most_recent_feature_collection(&format!("{ROOT}/missing"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn polling_backs_off_exponentially() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_job("slow", JobScript::new(vec![
        JobState::Queued,
        JobState::Running,
        JobState::Running,
        JobState::Completed,
    ]));
    let mut remote = orchestrator(&backend);
    remote.track_job("slow".to_string());

    let start = tokio::time::Instant::now();
    remote.wait().await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(16 + 32 + 64));
    assert_eq!(backend.status_queries(), 4);
    assert!(remote.pending_jobs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn connection_errors_while_polling_are_retried() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_job("flaky", JobScript::completes());
    backend.fail_next_status_queries(2);
    let mut remote = orchestrator(&backend);
    remote.track_job("flaky".to_string());

    let start = tokio::time::Instant::now();
    remote.wait().await.unwrap();
    assert_eq!(backend.status_queries(), 3);
    assert_eq!(start.elapsed(), Duration::from_secs(16 + 32));
}

#[tokio::test]
async fn failed_jobs_are_aggregated() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_job("A", JobScript::fails("Image.reduceRegion: Too many pixels"));
    backend.add_job("B", JobScript::new(vec![JobState::Succeeded]));
    backend.add_job("C", JobScript::fails("Table is empty."));
    backend.add_job("D", JobScript::new(vec![JobState::Cancelled]));
    let mut remote = orchestrator(&backend);
    for id in ["A", "B", "C", "D"] {
        remote.track_job(id.to_string());
    }

    let failed = expect_jobs_failed(remote.wait().await);
    assert_eq!(failed.failure_count(), 2);
    assert_eq!(failed.to_string(), "Failed remote jobs: 2");
    assert_eq!(failed.statuses().keys().collect::<Vec<_>>(), vec!["A", "C"]);
    assert_eq!(failed.error_messages(), vec![
        "Image.reduceRegion: Too many pixels",
        "Table is empty.",
    ]);
}

#[tokio::test]
async fn image_export_is_named_after_taskdate_and_stamped() {
    let backend = Arc::new(MemoryBackend::new());
    let mut remote = orchestrator(&backend);

    let job_id = remote
        .export_image(json!({"expression": "roads"}), "driver/roads", ImageExport::default())
        .await
        .unwrap();
    assert_eq!(remote.pending_jobs(), vec![&job_id]);

    let exports = backend.exports();
    assert_eq!(exports.len(), 1);
    let export = &exports[0];
    assert_eq!(export.description, "roads");
    assert_eq!(export.scale, Some(1000.0));
    assert_eq!(export.crs.as_deref(), Some("EPSG:4326"));
    assert_eq!(export.region.as_ref(), remote.geo.extent());
    assert_eq!(
        export.properties.get(TIMESTAMP_PROPERTY),
        Some(&PropertyValue::Number(millis(2024, 1, 10)))
    );
    match &export.destination {
        ExportDestination::Asset { asset_id, pyramiding } => {
            assert_eq!(asset_id, "projects/HII/v1/driver/roads/roads_2024-01-10");
            assert_eq!(pyramiding.get(".default").map(String::as_str), Some("mean"));
        },
        other => panic!("unexpected destination {other:?}"),
    }

    remote.wait().await.unwrap();
    let output = backend
        .get_asset("projects/HII/v1/driver/roads/roads_2024-01-10")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(output.time_start, Some(millis(2024, 1, 10)));
}

#[tokio::test]
async fn table_exports_and_storage_exports() {
    let backend = Arc::new(MemoryBackend::new());
    let mut remote = orchestrator(&backend);

    remote.export_table(json!({"table": "ranges"}), "tigris/ranges").await.unwrap();
    remote
        .table_to_storage(json!({"table": "ranges"}), "scl-pipeline", "tigris/ranges.geojson", None, None)
        .await
        .unwrap();
    remote
        .image_to_storage(json!({"expression": "hii"}), "hii-export", "hii/2024/hii.tif", None)
        .await
        .unwrap();
    assert_eq!(remote.pending_jobs().len(), 3);

    let exports = backend.exports();
    assert_eq!(exports[0].destination, ExportDestination::Asset {
        asset_id: "projects/HII/v1/tigris/ranges/ranges_2024-01-10".to_string(),
        pyramiding: Default::default(),
    });
    match &exports[1].destination {
        ExportDestination::Storage { bucket, format, .. } => {
            assert_eq!(bucket, "scl-pipeline");
            assert_eq!(format, "GeoJSON");
        },
        other => panic!("unexpected destination {other:?}"),
    }
    assert_eq!(exports[2].description, "hii.tif");

    // the table's parent is a folder, not an image collection
    let parent = backend.asset("projects/HII/v1/tigris/ranges").unwrap();
    assert_eq!(parent.kind, AssetKind::Folder);
}

#[tokio::test]
async fn upload_then_ingest_under_dated_id() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("roads.tif");
    tokio::fs::write(&local, b"raster").await.unwrap();
    let store = LocalObjectStore::new(dir.path().join("store"), None);

    let backend = Arc::new(MemoryBackend::new());
    let mut remote = orchestrator(&backend);
    remote
        .upload_image(&store, &local, "roads/roads.tif", "driver/osm", Some(0))
        .await
        .unwrap();

    let ingests = backend.ingests();
    assert_eq!(ingests.len(), 1);
    assert!(ingests[0].source_uri.starts_with("file://"));
    assert_eq!(ingests[0].asset_id, "projects/HII/v1/driver/osm/osm_2024-01-10");
    assert_eq!(ingests[0].nodata, Some(0));

    remote.wait().await.unwrap();
    assert!(backend.exists("projects/HII/v1/driver/osm/osm_2024-01-10").await.unwrap());
}
