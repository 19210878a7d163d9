//! The change-watch loop end to end, over an in-memory filesystem.

use std::sync::Arc;

use serde_json::json;

use vm_manager::document::Document;
use vm_manager::reconcile::{shared, Shared};
use vm_manager::report::StatusSink;
use vm_manager::service::{ServiceRoot, WatchRuntime};
use vm_manager::watch::{Action, ChangeEvent, ChangeHandler, Watcher};

mod common;

use common::{eventually, MemoryFileAccess, RecordingSink, Report, ReportLog};

fn recording(runtime: &WatchRuntime) -> ReportLog {
    let log = ReportLog::default();
    let sink: Shared<dyn StatusSink> = shared(RecordingSink::new(log.clone()));
    runtime.sink.replace(vec![sink]);
    log
}

fn event(dir: &str, action: Action, file: &str) -> ChangeEvent {
    ChangeEvent::new(dir, vec![action], file)
}

#[tokio::test]
async fn test_watch_set_diffing() {
    let access = MemoryFileAccess::new();
    let runtime = WatchRuntime::default();
    let watcher = Watcher::new(access.clone());

    let first = watcher.sync_paths(&["/a".to_string(), "/b".to_string()], &runtime.handler);
    assert_eq!(first.added, vec!["/a", "/b"]);
    assert!(first.cancelled.is_empty());

    let second = watcher.sync_paths(&["/b".to_string(), "/c".to_string()], &runtime.handler);
    assert_eq!(second.cancelled, vec!["/a"]);
    assert_eq!(second.added, vec!["/c"]);
    assert_eq!(watcher.active_paths(), vec!["/b", "/c"]);
    assert_eq!(watcher.subscription_count("/b"), 1);

    access.wait_for_watch("/c").await;
    watcher.shutdown();
    assert!(watcher.active_paths().is_empty());
}

#[tokio::test]
async fn test_replaced_handler_is_swapped() {
    let access = MemoryFileAccess::new();
    let old = WatchRuntime::default();
    let new = WatchRuntime::default();
    let watcher = Watcher::new(access.clone());

    watcher.sync_paths(&["/a".to_string()], &old.handler);
    let diff = watcher.sync_paths(&["/a".to_string()], &new.handler);
    assert_eq!(diff.cancelled, vec!["/a"]);
    assert_eq!(diff.added, vec!["/a"]);
    assert_eq!(watcher.subscription_count("/a"), 1);

    let unchanged = watcher.sync_paths(&["/a".to_string()], &new.handler);
    assert!(unchanged.is_empty());
}

#[tokio::test]
async fn test_create_modify_delete() {
    let access = MemoryFileAccess::new();
    let runtime = WatchRuntime::default();
    let log = recording(&runtime);

    access.put("/vms/web.json", r#"{"server": {"ram": 512}}"#);
    runtime
        .handler
        .handle(access.as_ref(), &event("/vms", Action::Create, "web.json"))
        .await;
    let instance = runtime.registry.get("/vms/web.json").unwrap();
    let server = instance.read().unwrap().server.clone().unwrap();
    assert_eq!(server.read().unwrap().ram, 512);

    access.put("/vms/web.json", r#"{"server": {"ram": 1024}}"#);
    runtime
        .handler
        .handle(access.as_ref(), &event("/vms", Action::Modified, "web.json"))
        .await;
    // same instances, updated in place
    assert!(Arc::ptr_eq(&instance, &runtime.registry.get("/vms/web.json").unwrap()));
    assert_eq!(server.read().unwrap().ram, 1024);

    runtime
        .handler
        .handle(access.as_ref(), &event("/vms", Action::Other("ATTRIB".into()), "web.json"))
        .await;
    assert_eq!(runtime.registry.len(), 1);

    runtime
        .handler
        .handle(access.as_ref(), &event("/vms", Action::Delete, "web.json"))
        .await;
    assert!(runtime.registry.is_empty());

    assert_eq!(
        *log.lock().unwrap(),
        vec![Report::Reload("/vms/web.json".into()), Report::Reload("/vms/web.json".into())]
    );
}

#[tokio::test]
async fn test_failures_are_reported_and_processing_continues() {
    let access = MemoryFileAccess::new();
    let runtime = WatchRuntime::default();
    let log = recording(&runtime);

    // missing file, bad syntax, then a good file
    access.put("/vms/broken.json", "{ nope");
    access.put("/vms/good.json", r#"{"server": {"ram": 256}}"#);
    for file in ["missing.json", "broken.json", "good.json"] {
        runtime
            .handler
            .handle(access.as_ref(), &event("/vms", Action::Create, file))
            .await;
    }

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            Report::Bad("/vms/missing.json".into()),
            Report::Bad("/vms/broken.json".into()),
            Report::Reload("/vms/good.json".into()),
        ]
    );
    assert!(runtime.registry.get("/vms/good.json").is_some());
    assert!(runtime.registry.get("/vms/missing.json").is_none());
}

#[tokio::test]
async fn test_failing_sink_does_not_block_others() {
    let access = MemoryFileAccess::new();
    let runtime = WatchRuntime::default();
    let log = ReportLog::default();
    let failing: Shared<dyn StatusSink> = shared(RecordingSink::failing());
    let working: Shared<dyn StatusSink> = shared(RecordingSink::new(log.clone()));
    runtime.sink.replace(vec![failing, working]);

    access.put("/vms/a.json", "{}");
    runtime
        .handler
        .handle(access.as_ref(), &event("/vms", Action::Create, "a.json"))
        .await;
    assert_eq!(*log.lock().unwrap(), vec![Report::Reload("/vms/a.json".into())]);
}

#[tokio::test]
async fn test_events_flow_through_subscription() {
    let access = MemoryFileAccess::new();
    let runtime = WatchRuntime::default();
    let log = recording(&runtime);
    let watcher = Watcher::new(access.clone());
    watcher.subscribe("/vms", runtime.handler.clone());
    access.wait_for_watch("/vms").await;

    access.put("/vms/db.json", r#"{"parameters": {"hostname": "db1"}}"#);
    access.emit(event("/vms", Action::Create, "db.json")).await;

    assert!(eventually(|| runtime.registry.get("/vms/db.json").is_some()).await);
    assert!(eventually(|| log.lock().unwrap().len() == 1).await);
    let instance = runtime.registry.get("/vms/db.json").unwrap();
    let parameters = instance.read().unwrap().parameters.clone().unwrap();
    assert_eq!(parameters.read().unwrap().hostname.as_deref(), Some("db1"));

    assert_eq!(watcher.unsubscribe("/vms"), 1);
}

#[tokio::test]
async fn test_machine_file_resolves_configured_provider() {
    let access = MemoryFileAccess::new();
    let runtime = Arc::new(WatchRuntime::default());
    let log = recording(&runtime);
    let mut root = ServiceRoot::new(runtime.clone());
    root.reconfigure(&Document::from(json!({
        "vmproviders": [{"type": "linode", "name": "east", "apiKey": "k"}]
    })))
    .unwrap();

    access.put("/vms/web.json", r#"{"server": {"ram": 512, "cloud": "east"}}"#);
    access.put("/vms/lost.json", r#"{"server": {"cloud": "west"}}"#);
    for file in ["web.json", "lost.json"] {
        runtime
            .handler
            .handle(access.as_ref(), &event("/vms", Action::Create, file))
            .await;
    }

    let instance = runtime.registry.get("/vms/web.json").unwrap();
    let server = instance.read().unwrap().server.clone().unwrap();
    let cloud = server.read().unwrap().cloud.clone().unwrap();
    assert_eq!(cloud.name, "east");
    assert!(Arc::ptr_eq(&cloud.provider, &root.vmproviders[0]));

    assert_eq!(
        *log.lock().unwrap(),
        vec![Report::Reload("/vms/web.json".into()), Report::Bad("/vms/lost.json".into())]
    );
}
