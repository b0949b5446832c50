//! Startup recovery against records and inputs left by an earlier process.

mod common;

use std::sync::Arc;

use common::{write_wav, ScriptedEngine, Service};
use diarserve::config::CONFIG;
use diarserve::models::FileType;
use diarserve::recovery::{recover_all, MSG_INTERRUPTED};
use diarserve::{FileJobStore, Job, JobId, JobStore, State};

fn file_backed(engine: ScriptedEngine) -> Service {
    Service::start_with_store(engine, 2, 8, |data_dir| {
        Arc::new(FileJobStore::open(data_dir.clone()).unwrap())
    })
}

fn leave_input(service: &Service, id: &str, channels: u16, rate: u32) -> Job {
    let id = JobId::new(id);
    let path = service
        .data_dir
        .build_path(&id, FileType::Input { extension: ".wav" });
    write_wav(&path, channels, rate, 1600);
    Job::accepted(id, path)
}

fn finish(service: Service) -> (Arc<dyn JobStore>, Arc<ScriptedEngine>, tempfile::TempDir) {
    let Service {
        dir,
        store,
        engine,
        pool,
        ..
    } = service;
    pool.shutdown();
    (store, engine, dir)
}

#[test]
fn accepted_job_with_input_is_resumed_once() {
    let service = file_backed(ScriptedEngine::new(vec![0, 1], 2));
    let job = leave_input(&service, "upload-crash1", 1, 16000);
    service.store.put(&job).unwrap();

    let report = recover_all(
        &service.data_dir,
        &service.store,
        &service.pool.dispatcher(),
        &CONFIG.requirements,
    )
    .unwrap();
    assert_eq!(report.resumed, vec![job.id.clone()]);

    let result_path = service.data_dir.build_path(&job.id, FileType::Result);
    let (store, engine, _dir) = finish(service);

    let recovered = store.get(&job.id).unwrap().unwrap();
    assert_eq!(recovered.state, State::Done);
    assert_eq!(recovered.created_at, job.created_at);
    assert_eq!(recovered.result_path, Some(result_path));
    assert!(!job.source_path.exists());
    assert_eq!(engine.calls(), 1);
}

#[test]
fn input_without_record_is_picked_up() {
    let service = Service::start(ScriptedEngine::new(vec![3], 1), 1, 4);
    let job = leave_input(&service, "upload-orphan", 1, 16000);

    let report = recover_all(
        &service.data_dir,
        &service.store,
        &service.pool.dispatcher(),
        &CONFIG.requirements,
    )
    .unwrap();
    assert_eq!(report.resumed.len(), 1);

    let (store, _engine, _dir) = finish(service);
    assert_eq!(store.get(&job.id).unwrap().unwrap().state, State::Done);
}

#[test]
fn invalid_input_is_rejected_and_removed() {
    let service = file_backed(ScriptedEngine::new(vec![0], 1));
    let job = leave_input(&service, "upload-stereo", 2, 16000);
    service.store.put(&job).unwrap();

    let report = recover_all(
        &service.data_dir,
        &service.store,
        &service.pool.dispatcher(),
        &CONFIG.requirements,
    )
    .unwrap();
    assert_eq!(report.rejected, vec![job.id.clone()]);
    assert!(!job.source_path.exists());

    let (store, engine, _dir) = finish(service);
    let rejected = store.get(&job.id).unwrap().unwrap();
    assert_eq!(rejected.state, State::Rejected);
    assert_eq!(
        rejected.error_message.as_deref(),
        Some("The file contains more than one channel (i.e. 2).")
    );
    assert_eq!(engine.calls(), 0);
}

#[test]
fn running_record_without_input_is_failed() {
    let service = file_backed(ScriptedEngine::new(vec![0], 1));
    let mut job = Job::accepted(
        JobId::new("upload-lost"),
        service.data_dir.inputs().join("upload-lost.wav"),
    );
    job.mark_running().unwrap();
    service.store.put(&job).unwrap();

    let report = recover_all(
        &service.data_dir,
        &service.store,
        &service.pool.dispatcher(),
        &CONFIG.requirements,
    )
    .unwrap();
    assert_eq!(report.interrupted, vec![job.id.clone()]);

    let failed = service.store.get(&job.id).unwrap().unwrap();
    assert_eq!(failed.state, State::Failed);
    assert_eq!(failed.error_message.as_deref(), Some(MSG_INTERRUPTED));
    finish(service);
}

#[test]
fn finished_jobs_are_left_alone() {
    let service = file_backed(ScriptedEngine::new(vec![0], 1));
    let mut job = leave_input(&service, "upload-done", 1, 16000);
    job.complete(service.data_dir.build_path(&job.id, FileType::Result), 1)
        .unwrap();
    service.store.put(&job).unwrap();

    let report = recover_all(
        &service.data_dir,
        &service.store,
        &service.pool.dispatcher(),
        &CONFIG.requirements,
    )
    .unwrap();
    assert_eq!(report.skipped, vec![job.id.clone()]);
    assert!(report.resumed.is_empty());
    assert_eq!(service.store.get(&job.id).unwrap(), Some(job));

    let (_store, engine, _dir) = finish(service);
    assert_eq!(engine.calls(), 0);
}

#[test]
fn staging_leftovers_are_purged() {
    let service = file_backed(ScriptedEngine::new(vec![0], 1));
    std::fs::write(service.data_dir.staging().join("upload-half"), b"RIFF").unwrap();

    let report = recover_all(
        &service.data_dir,
        &service.store,
        &service.pool.dispatcher(),
        &CONFIG.requirements,
    )
    .unwrap();
    assert!(report.resumed.is_empty());
    assert_eq!(service.files_in(&service.data_dir.staging()), 0);
    finish(service);
}

#[test]
fn second_scan_does_not_duplicate_live_work() {
    let service = file_backed(ScriptedEngine::new(vec![0], 1));
    let job = leave_input(&service, "upload-once", 1, 16000);
    let hold = service.engine.gate.lock();

    let dispatcher = service.pool.dispatcher();
    let first = recover_all(&service.data_dir, &service.store, &dispatcher, &CONFIG.requirements).unwrap();
    let second = recover_all(&service.data_dir, &service.store, &dispatcher, &CONFIG.requirements).unwrap();
    assert_eq!(first.resumed, vec![job.id.clone()]);
    assert_eq!(second.skipped, vec![job.id.clone()]);
    assert!(second.resumed.is_empty());

    drop(hold);
    drop(dispatcher);
    let (store, engine, _dir) = finish(service);
    assert_eq!(engine.calls(), 1);
    assert_eq!(store.get(&job.id).unwrap().unwrap().state, State::Done);
}

#[test]
fn corrupt_record_does_not_stop_other_jobs() {
    let service = file_backed(ScriptedEngine::new(vec![0, 1], 2));
    let broken = leave_input(&service, "upload-aaa", 1, 16000);
    let record = service.data_dir.build_path(&broken.id, FileType::Record);
    std::fs::write(&record, b"{\"id\":\"upload-aaa\",\"sta").unwrap();
    let good = leave_input(&service, "upload-good", 1, 16000);

    let report = recover_all(
        &service.data_dir,
        &service.store,
        &service.pool.dispatcher(),
        &CONFIG.requirements,
    )
    .unwrap();
    assert_eq!(report.unreadable, vec![broken.id.clone()]);
    assert_eq!(report.resumed, vec![good.id.clone()]);

    let (store, engine, _dir) = finish(service);
    assert_eq!(store.get(&good.id).unwrap().unwrap().state, State::Done);
    assert!(broken.source_path.exists());
    assert_eq!(std::fs::read(&record).unwrap(), b"{\"id\":\"upload-aaa\",\"sta");
    assert_eq!(engine.calls(), 1);
}

#[test]
fn running_record_with_input_starts_over() {
    let service = file_backed(ScriptedEngine::new(vec![0], 1));
    let mut job = leave_input(&service, "upload-midway", 1, 16000);
    job.mark_running().unwrap();
    service.store.put(&job).unwrap();
    let hold = service.engine.gate.lock();

    let report = recover_all(
        &service.data_dir,
        &service.store,
        &service.pool.dispatcher(),
        &CONFIG.requirements,
    )
    .unwrap();
    assert_eq!(report.resumed, vec![job.id.clone()]);

    let requeued = service.store.get(&job.id).unwrap().unwrap();
    assert!(matches!(requeued.state, State::Accepted | State::Running));
    assert_eq!(requeued.created_at, job.created_at);

    drop(hold);
    let (store, engine, _dir) = finish(service);
    assert_eq!(store.get(&job.id).unwrap().unwrap().state, State::Done);
    assert_eq!(engine.calls(), 1);
}
