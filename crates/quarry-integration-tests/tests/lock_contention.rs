//! A slow reader delays the tick's write barrier but never breaks it.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use quarry_integration_tests::{CounterManager, init_tracing};
use quarry_tick::{RegionExecutor, RegionId, SchedulerConfig, Sequence, TickScheduler};

#[test]
fn test_slow_reader_delays_but_does_not_break_the_tick() {
    init_tracing();
    let config = SchedulerConfig {
        // Escalate quickly so the stall-reporting path actually runs.
        write_lock_delay_millis: 10,
        lock_stall_threshold_millis: 5,
        ..SchedulerConfig::default()
    };
    let mut scheduler = TickScheduler::new(config);

    let manager = CounterManager::new(Sequence::Local);
    let value = manager.value();
    scheduler
        .add_region(RegionExecutor::new(RegionId(0), "region-0", Box::new(manager)))
        .unwrap();

    let lock = Arc::clone(scheduler.snapshot_lock());
    let (acquired_tx, acquired_rx) = crossbeam_channel::bounded(1);
    let reader = thread::spawn(move || {
        let guard = lock.read_guard("slow-plugin");
        acquired_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(150));
        drop(guard);
    });
    acquired_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("reader should signal after taking the lock");

    // The tick blocks on the write barrier until the reader releases, then
    // completes normally.
    let summary = scheduler.tick(Duration::from_millis(50));
    assert_eq!(summary.failed_tasks, 0);
    assert_eq!(value.get(), 1);

    reader.join().unwrap();
    assert!(!scheduler.snapshot_lock().is_write_locked());
    assert_eq!(scheduler.snapshot_lock().open_locks("slow-plugin"), 0);

    scheduler.shutdown();
}
