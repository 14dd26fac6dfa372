//! 端到端场景（spec.md §8 场景 6）：`pend_submission` 之后、worker 应答
//! 之前调用 `cancel_all`；提交的结果必须是 `Aborted`，取消本身必须干净
//! 返回，且没有节点在之后被复用。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use forge_core::ConfigurationKey;
use forge_manager::{BeginBuildParams, BuildManager};
use forge_node::{HandshakeIdentity, NodeManagerConfig};

fn manager_with_a_worker_that_never_connects() -> BuildManager {
    let dir = tempfile::tempdir().unwrap();
    let socket_dir = dir.path().to_path_buf();
    // Leak the tempdir so the socket directory outlives the manager under test.
    std::mem::forget(dir);

    BuildManager::new(
        NodeManagerConfig {
            capacity: 4,
            socket_dir,
            // `/bin/true` exits immediately without ever dialing the node's
            // socket, so the scheduled request is guaranteed to still be
            // outstanding when we cancel.
            worker_binary: PathBuf::from("/bin/true"),
            connect_timeout: Duration::from_secs(30),
            handshake_identity: HandshakeIdentity::new("forge/1.0.0"),
        },
        4,
    )
}

#[tokio::test]
async fn cancel_all_aborts_an_open_submission_and_drains_cleanly() {
    let mgr = Arc::new(manager_with_a_worker_that_never_connects());
    mgr.begin_build(BeginBuildParams::default()).unwrap();

    let (submission_id, receiver) = mgr
        .pend_submission(ConfigurationKey::new("app.proj", "17.0", vec![]), vec!["Build".into()])
        .unwrap();

    let mgr_for_execute = mgr.clone();
    let execute = tokio::spawn(async move { mgr_for_execute.execute_submission(submission_id, receiver).await });

    // Give the work queue a chance to create a node and schedule the
    // request before we pull the rug out from under it.
    tokio::time::sleep(Duration::from_millis(100)).await;

    mgr.cancel_all().await.unwrap();

    let result = execute
        .await
        .unwrap()
        .expect("cancellation must synthesize a result, not drop the waiter");
    assert!(result.aborted, "expected an Aborted result, got {result:?}");
    assert!(!result.is_success());

    // The manager drained back to Idle; a fresh build can begin immediately.
    mgr.begin_build(BeginBuildParams::default()).unwrap();
}
