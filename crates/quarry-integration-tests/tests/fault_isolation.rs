//! A faulting region must not stall or corrupt its siblings, and must
//! recover on the next tick.

use std::time::Duration;

use quarry_integration_tests::{CounterManager, init_tracing};
use quarry_tick::{RegionExecutor, RegionId, SchedulerConfig, Sequence, TickScheduler};

#[test]
fn test_faulting_region_recovers_on_the_next_tick() {
    init_tracing();
    let bad = CounterManager::new(Sequence::Local).with_physics_failure_on_tick(2);
    let good = CounterManager::new(Sequence::Local);
    let bad_value = bad.value();
    let good_value = good.value();

    let mut scheduler = TickScheduler::new(SchedulerConfig::default());
    scheduler
        .add_region(RegionExecutor::new(RegionId(0), "bad", Box::new(bad)))
        .unwrap();
    scheduler
        .add_region(RegionExecutor::new(RegionId(1), "good", Box::new(good)))
        .unwrap();

    let summary = scheduler.tick(Duration::from_millis(50));
    assert_eq!(summary.failed_tasks, 0);
    assert_eq!(bad_value.get(), 1);
    assert_eq!(good_value.get(), 1);

    // Tick 2: the bad region faults in physics. Its snapshot stays at the
    // previous tick while the good region completes normally.
    let summary = scheduler.tick(Duration::from_millis(50));
    assert!(summary.failed_tasks >= 1);
    assert!(summary.skipped_tasks >= 1);
    assert_eq!(bad_value.get(), 1);
    assert_eq!(good_value.get(), 2);

    // Tick 3: the fault was confined to one tick.
    let summary = scheduler.tick(Duration::from_millis(50));
    assert_eq!(summary.failed_tasks, 0);
    assert_eq!(bad_value.get(), 3);
    assert_eq!(good_value.get(), 3);

    scheduler.shutdown();
}
