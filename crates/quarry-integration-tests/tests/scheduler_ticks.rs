//! Multi-region, multi-tick scheduler runs.

use std::time::Duration;

use quarry_integration_tests::{CounterManager, DirtyBlock, init_tracing};
use quarry_sync::SetQueueElement;
use quarry_tick::{Direction, RegionExecutor, RegionId, SchedulerConfig, Sequence, TickScheduler};

#[test]
fn test_regions_tick_in_lockstep() {
    init_tracing();
    let mut scheduler = TickScheduler::new(SchedulerConfig::default());

    let sequences = [
        Sequence::Local,
        Sequence::Neighbor(Direction::new(1, 0, 0).unwrap()),
        Sequence::Neighbor(Direction::new(-1, 1, 1).unwrap()),
    ];
    let mut values = Vec::new();
    for (i, sequence) in sequences.into_iter().enumerate() {
        let manager = CounterManager::new(sequence);
        values.push(manager.value());
        let executor = RegionExecutor::new(
            RegionId(u32::try_from(i).unwrap()),
            format!("region-{i}"),
            Box::new(manager),
        );
        scheduler.add_region(executor).unwrap();
    }

    for tick in 0u64..5 {
        let summary = scheduler.tick(Duration::from_millis(50));
        assert_eq!(summary.tick, tick);
        assert_eq!(summary.failed_tasks, 0);
        assert_eq!(summary.skipped_tasks, 0);

        // Every region published exactly this tick's state before the tick
        // call returned.
        for value in &values {
            assert_eq!(value.get(), tick + 1);
        }
    }
    assert_eq!(scheduler.current_tick(), 5);

    scheduler.shutdown();
}

#[test]
fn test_dynamic_updates_run_when_due() {
    init_tracing();
    let mut scheduler = TickScheduler::new(SchedulerConfig::default());

    let manager = CounterManager::new(Sequence::Local).with_dynamic_update_at(10);
    scheduler
        .add_region(RegionExecutor::new(RegionId(0), "region-0", Box::new(manager)))
        .unwrap();

    let summary = scheduler.tick(Duration::from_millis(50));
    assert_eq!(summary.updates, 1);
    assert_eq!(summary.failed_tasks, 0);

    // The update was consumed; the next tick has nothing pending.
    let summary = scheduler.tick(Duration::from_millis(50));
    assert_eq!(summary.updates, 0);

    scheduler.shutdown();
}

#[test]
fn test_dirty_blocks_are_drained_by_physics() {
    init_tracing();
    let mut scheduler = TickScheduler::new(SchedulerConfig::default());

    let manager = CounterManager::new(Sequence::Local);
    let queue = manager.dirty_queue();
    scheduler
        .add_region(RegionExecutor::new(RegionId(0), "region-0", Box::new(manager)))
        .unwrap();

    // Marking the same block dirty twice enqueues it once.
    let block = SetQueueElement::new(&queue, DirtyBlock::new(5));
    assert!(block.add().unwrap());
    assert!(!block.add().unwrap());

    let summary = scheduler.tick(Duration::from_millis(50));
    assert_eq!(summary.updates, 1);
    assert!(!block.is_queued());

    // A block removed after being marked dirty is discarded, not processed.
    let gone = SetQueueElement::new(&queue, DirtyBlock::new(6));
    assert!(gone.add().unwrap());
    gone.value().remove();

    let summary = scheduler.tick(Duration::from_millis(50));
    assert_eq!(summary.updates, 0);

    scheduler.shutdown();
}
