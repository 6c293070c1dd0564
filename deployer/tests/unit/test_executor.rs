//! Readiness polling and command execution against an in-memory cluster

use std::sync::{Arc, Mutex};
use std::time::Duration;

use coadeploy::cluster::exec::{CommandExecutor, InstanceSelector};
use coadeploy::cluster::memory::MemoryCluster;
use coadeploy::cluster::readiness::ReadinessPoller;
use coadeploy::errors::DeployerError;
use coadeploy::output::CollectingSink;
use coadeploy::retry::RetryPolicy;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

fn commands() -> Vec<Vec<String>> {
    vec![vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        "echo ready".to_string(),
    ]]
}

fn executor(cluster: Arc<MemoryCluster>) -> CommandExecutor {
    let poller = ReadinessPoller::new(cluster.clone(), "coa", RetryPolicy::workload_ready());
    CommandExecutor::new(cluster, poller, RetryPolicy::exec_channel(), None)
}

#[tokio::test]
async fn test_waits_for_workload_then_retries_channel() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.add_workload("tes", 3);
    cluster.add_instance("tes-6b7c9-x1y2z", &[("app", "tes")]);
    cluster.fail_exec_channels(2);
    cluster.set_exec_output("ready\n", "");

    let sink = Arc::new(CollectingSink::new());
    let poller = ReadinessPoller::new(cluster.clone(), "coa", RetryPolicy::workload_ready());
    let executor = CommandExecutor::new(
        cluster.clone(),
        poller,
        RetryPolicy::exec_channel(),
        Some(sink.clone()),
    );

    let sleeps = Arc::new(Mutex::new(Vec::new()));
    let recorded = sleeps.clone();
    let attempts = executor
        .execute(
            "tes",
            &InstanceSelector::label("app", "tes"),
            "tes",
            &commands(),
            Duration::from_secs(180),
            move |d| {
                recorded.lock().unwrap().push(d);
                futures::future::ready(())
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(attempts, 3);
    assert_eq!(cluster.workload_queries(), 3);
    assert_eq!(
        *sleeps.lock().unwrap(),
        vec![
            Duration::from_secs(15),
            Duration::from_secs(15),
            Duration::from_secs(5),
            Duration::from_secs(5),
        ]
    );
    assert_eq!(
        sink.lines(),
        vec![("tes-6b7c9-x1y2z".to_string(), "ready".to_string())]
    );
}

#[tokio::test]
async fn test_cancellation_stops_channel_retries() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.add_workload("tes", 1);
    cluster.add_instance("tes-6b7c9-x1y2z", &[("app", "tes")]);
    cluster.fail_exec_channels(100);
    let executor = executor(cluster.clone());

    let cancel = CancellationToken::new();
    let sleep_cancel = cancel.clone();
    let sleeps = Arc::new(Mutex::new(0u32));
    let sleep_fn = move |_: Duration| -> BoxFuture<'static, ()> {
        let mut count = sleeps.lock().unwrap();
        *count += 1;
        if *count >= 3 {
            sleep_cancel.cancel();
            futures::future::pending().boxed()
        } else {
            futures::future::ready(()).boxed()
        }
    };

    let err = executor
        .execute(
            "tes",
            &InstanceSelector::name_prefix("tes-"),
            "tes",
            &commands(),
            Duration::from_secs(180),
            sleep_fn,
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DeployerError::Cancelled));
    assert_eq!(cluster.exec_attempts(), 3);
    assert!(cluster.exec_calls().is_empty());
}

#[tokio::test]
async fn test_other_workloads_do_not_satisfy_readiness() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.add_workload("cromwell", 1);
    cluster.add_workload("tes", u32::MAX);
    let poller = ReadinessPoller::new(
        cluster.clone(),
        "coa",
        RetryPolicy::new(4, Duration::from_secs(15)),
    );

    let err = poller
        .ensure_ready(
            "tes",
            Duration::from_secs(30),
            |_| futures::future::ready(()),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DeployerError::WorkloadStartupTimeout { ref workload } if workload == "tes"));
    assert_eq!(cluster.workload_queries(), 4);
}
