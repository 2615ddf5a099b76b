use super::*;
use crate::error::CoordinationError;
use crate::models::Task;
use crate::performance::PerformanceModels;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

#[tokio::test]
async fn test_consumed_item_not_redelivered() {
    let queue: WorkQueue<u64> = WorkQueue::new("/matrix");
    queue.put(7);

    assert_eq!(queue.get().await, 7);
    // get only peeks
    assert_eq!(queue.get().await, 7);
    assert_eq!(queue.consume(), Some(7));

    let second = tokio::time::timeout(Duration::from_millis(50), queue.get()).await;
    assert!(second.is_err(), "second get should block on an empty queue");
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_blocked_get_wakes_on_put() {
    let queue = Arc::new(WorkQueue::<u64>::new("/vecmath"));
    let waiter = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.get().await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    queue.put(3);

    let item = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("get should wake")
        .unwrap();
    assert_eq!(item, 3);
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_queue_preserves_order() {
    let queue: WorkQueue<u64> = WorkQueue::new("/cache");
    for size in [5, 9, 2] {
        queue.put(size);
    }
    let mut seen = Vec::new();
    while !queue.is_empty() {
        seen.push(queue.get().await);
        queue.consume();
    }
    assert_eq!(seen, vec![5, 9, 2]);
    assert_eq!(queue.consume(), None);
}

#[tokio::test]
async fn test_barrier_releases_all_parties() {
    let barrier = Arc::new(DoubleBarrier::new("/barrier", 3, Some(Duration::from_secs(5))));

    for _round in 0..3 {
        let mut handles = Vec::new();
        for _ in 0..2 {
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.enter().await?;
                barrier.leave().await
            }));
        }

        barrier.enter().await.unwrap();
        barrier.leave().await.unwrap();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }
}

#[tokio::test]
async fn test_barrier_does_not_release_early() {
    let barrier = Arc::new(DoubleBarrier::new("/barrier", 3, None));
    let early = {
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move { barrier.enter().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!early.is_finished());

    let second = {
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move { barrier.enter().await })
    };
    barrier.enter().await.unwrap();

    early.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_barrier_timeout_reports_gang_stall() {
    let barrier = DoubleBarrier::new("/barrier", 2, Some(Duration::from_millis(20)));

    match barrier.enter().await {
        Err(CoordinationError::GangStall {
            barrier: name,
            phase,
            waited,
        }) => {
            assert_eq!(name, "/barrier");
            assert_eq!(phase, "enter");
            assert!(waited >= Duration::from_millis(20));
        }
        other => panic!("expected gang stall, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stalled_arrival_is_withdrawn() {
    let barrier = Arc::new(DoubleBarrier::new("/barrier", 2, Some(Duration::from_millis(20))));
    assert!(barrier.enter().await.is_err());

    // A lone late party must not be released by the withdrawn arrival
    assert!(barrier.enter().await.is_err());

    let other = {
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move { barrier.enter().await })
    };
    barrier.enter().await.unwrap();
    other.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_hub_queue_get_or_create_and_reset() {
    let hub = CoordinationHub::new("/barrier", 2, None);
    let first = hub.queue("matrix");
    let again = hub.queue("matrix");
    assert!(Arc::ptr_eq(&first, &again));

    first.put(WorkItem::Step {
        time_step: 0,
        workload_size: 10.0,
    });
    hub.queue("vecmath").put(WorkItem::Stop);

    hub.reset();
    assert!(hub.queue("matrix").is_empty());
    assert!(hub.queue("vecmath").is_empty());
    assert_eq!(hub.barrier().parties(), 2);
}

struct Recording {
    calls: Mutex<Vec<(String, f64, u32)>>,
    fail: bool,
}

#[async_trait]
impl WorkExecutor for Recording {
    async fn execute(&self, task: &Task, workload_size: f64, cpu_shares: u32) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((task.name.clone(), workload_size, cpu_shares));
        if self.fail {
            anyhow::bail!("boom");
        }
        Ok(())
    }
}

async fn run_gang(fail: bool) -> Vec<(String, f64, u32)> {
    let hub = CoordinationHub::new("/barrier", 3, Some(Duration::from_secs(5)));
    let executor = Arc::new(Recording {
        calls: Mutex::new(Vec::new()),
        fail,
    });

    let mut workers = Vec::new();
    for (name, shares) in [("matrix", 300), ("vecmath", 100)] {
        let worker = GangWorker::new(
            Task::new(name, "--matrix-ops"),
            shares,
            hub.queue(name),
            hub.barrier(),
            executor.clone(),
        );
        workers.push(tokio::spawn(worker.run()));
    }

    for time_step in 0..2 {
        hub.queue("matrix").put(WorkItem::Step {
            time_step,
            workload_size: 10.0 + time_step as f64,
        });
        hub.queue("vecmath").put(WorkItem::Step {
            time_step,
            workload_size: 20.0 + time_step as f64,
        });
        hub.barrier().enter().await.unwrap();
        hub.barrier().leave().await.unwrap();
    }

    hub.queue("matrix").put(WorkItem::Stop);
    hub.queue("vecmath").put(WorkItem::Stop);
    for worker in workers {
        worker.await.unwrap().unwrap();
    }

    let mut calls = executor.calls.lock().unwrap().clone();
    calls.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
    calls
}

#[tokio::test]
async fn test_gang_workers_run_one_item_per_step() {
    let calls = run_gang(false).await;
    assert_eq!(
        calls,
        vec![
            ("matrix".to_string(), 10.0, 300),
            ("matrix".to_string(), 11.0, 300),
            ("vecmath".to_string(), 20.0, 100),
            ("vecmath".to_string(), 21.0, 100),
        ]
    );
}

#[tokio::test]
async fn test_failed_work_still_reaches_barrier() {
    assert_eq!(run_gang(true).await.len(), 4);
}

#[test]
fn test_stress_ng_arguments() {
    let task = Task::new("matrix", "--matrix-ops").with_modifier(1000);
    let executor = StressNgExecutor::new(0);
    assert_eq!(
        executor.args(&task, 12.0),
        vec!["--metrics", "--matrix", "0", "--matrix-ops", "12000"]
    );
    assert_eq!(StressNgExecutor::operations(&task, 0.5), 500);
}

#[tokio::test]
async fn test_stress_ng_missing_program_is_error() {
    let task = Task::new("matrix", "--matrix-ops");
    let executor = StressNgExecutor::new(1).with_program("/nonexistent/stress-ng");
    assert!(executor.execute(&task, 1.0, 100).await.is_err());
}

#[tokio::test]
async fn test_model_executor_sleeps_scaled_duration() {
    let mut models = PerformanceModels::new();
    models.insert("matrix", |size: f64, shares: u32| size * 100.0 / shares as f64);
    let executor = ModelExecutor::new(Arc::new(models), 0.001);
    let task = Task::new("matrix", "--matrix-ops");

    let started = std::time::Instant::now();
    executor.execute(&task, 100.0, 100).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));

    let unknown = Task::new("vecmath", "--vecmath-ops");
    assert!(executor.execute(&unknown, 1.0, 100).await.is_err());
}
