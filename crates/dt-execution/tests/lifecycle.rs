// lifecycle.rs — End-to-end lifecycle tests over the file-backed service.

use std::sync::Arc;
use std::thread;

use chrono::Utc;
use tempfile::{tempdir, TempDir};
use uuid::Uuid;

use dt_audit::{AuditAction, AuditFilter, AuditTrail};
use dt_execution::{
    CompleteDeliveryRequest, DeliveryStatus, DistConfig, DistributionService, ExecutionError,
    ExecutionStatus, FileScheduleProvider, Schedule, ScheduleProvider, ScheduleStatus,
    ScheduleTarget, TrackingPoint,
};

fn target(name: &str, portions: u32) -> ScheduleTarget {
    ScheduleTarget {
        name: name.to_string(),
        address: format!("Jl. {name}"),
        planned_portions: portions,
    }
}

fn seeded(targets: Vec<ScheduleTarget>) -> (TempDir, DistributionService, Uuid) {
    let dir = tempdir().unwrap();
    let config = DistConfig::for_data_dir(dir.path());
    let provider = FileScheduleProvider::new(&config.schedules_dir).unwrap();
    let schedule = Schedule::new("DST-2026-0001", 300, targets);
    provider.save(&schedule).unwrap();
    let service = DistributionService::open(config).unwrap();
    (dir, service, schedule.schedule_id)
}

fn point() -> TrackingPoint {
    TrackingPoint {
        recorded_at: Utc::now(),
        latitude: -6.914744,
        longitude: 107.609810,
        speed_kmh: Some(32.0),
    }
}

fn run_to_delivered(service: &DistributionService, delivery_id: Uuid, portions: u32) {
    service.start_delivery(delivery_id, "driver", point()).unwrap();
    service.arrive_delivery(delivery_id, "driver", point()).unwrap();
    service
        .complete_delivery(
            &CompleteDeliveryRequest {
                delivery_id,
                portions_delivered: portions,
                beneficiaries_reached: portions.saturating_sub(5),
                quality_check: None,
                signature: None,
            },
            "driver",
        )
        .unwrap();
}

#[test]
fn full_run_from_schedule_to_completed() {
    let (_dir, service, schedule_id) = seeded(vec![
        target("SDN 04", 120),
        target("SDN 07", 80),
        target("SMP 02", 100),
    ]);

    let execution = service.start_execution(schedule_id, "op", None).unwrap();
    assert_eq!(execution.status, ExecutionStatus::Preparing);

    let deliveries = service.list_deliveries(execution.execution_id).unwrap();
    for delivery in &deliveries {
        run_to_delivered(&service, delivery.delivery_id, delivery.planned_portions);
    }

    let done = service
        .complete_execution(execution.execution_id, "op", Some("all sites served".into()))
        .unwrap();
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert!(done.actual_end_time.is_some());
    assert_eq!(done.metrics.total_portions_delivered, 300);
    assert_eq!(done.metrics.completed_delivery_count, 3);
    assert!((done.metrics.progress_ratio - 1.0).abs() < f64::EPSILON);

    // Scheduler was told.
    let provider = FileScheduleProvider::new(&service.config().schedules_dir).unwrap();
    assert_eq!(
        provider.fetch(schedule_id).unwrap().status,
        ScheduleStatus::Done
    );

    // The whole run is on the chain, and the chain verifies.
    assert!(AuditTrail::verify_chain(&service.config().audit_log).unwrap());
    let entries = AuditTrail::query(
        &service.config().audit_log,
        execution.execution_id,
        &AuditFilter::default(),
    )
    .unwrap();
    assert!(entries
        .iter()
        .any(|e| matches!(e.action, AuditAction::Complete)));
}

#[test]
fn completion_blocked_while_deliveries_open() {
    let (_dir, service, schedule_id) = seeded(vec![target("SDN 04", 100), target("SDN 07", 100)]);
    let execution = service.start_execution(schedule_id, "op", None).unwrap();
    let deliveries = service.list_deliveries(execution.execution_id).unwrap();

    run_to_delivered(&service, deliveries[0].delivery_id, 100);

    let result = service.complete_execution(execution.execution_id, "op", None);
    match result {
        Err(ExecutionError::IncompleteDeliveries { open, .. }) => assert_eq!(open, 1),
        other => panic!("expected IncompleteDeliveries, got {other:?}"),
    }

    // Still open for business after the rejection.
    let execution = service.get_execution(execution.execution_id).unwrap();
    assert!(!execution.status.is_terminal());
}

#[test]
fn partial_failure_run_completes_with_reduced_metrics() {
    let (_dir, service, schedule_id) = seeded(vec![
        target("SDN 04", 100),
        target("SDN 07", 100),
        target("SMP 02", 100),
    ]);
    let execution = service.start_execution(schedule_id, "op", None).unwrap();
    let deliveries = service.list_deliveries(execution.execution_id).unwrap();

    run_to_delivered(&service, deliveries[0].delivery_id, 100);
    run_to_delivered(&service, deliveries[1].delivery_id, 90);
    service
        .start_delivery(deliveries[2].delivery_id, "driver", point())
        .unwrap();
    service
        .fail_delivery(deliveries[2].delivery_id, "driver", "road flooded")
        .unwrap();

    let done = service
        .complete_execution(execution.execution_id, "op", None)
        .unwrap();
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.metrics.total_portions_delivered, 190);
    assert_eq!(done.metrics.completed_delivery_count, 3);
    assert!(done.metrics.progress_ratio < 1.0);
}

#[test]
fn all_failed_run_still_reaches_completed() {
    let (_dir, service, schedule_id) = seeded(vec![target("SDN 04", 100)]);
    let execution = service.start_execution(schedule_id, "op", None).unwrap();
    let deliveries = service.list_deliveries(execution.execution_id).unwrap();

    service
        .fail_delivery(deliveries[0].delivery_id, "op", "kitchen contamination")
        .unwrap();

    // Never left Preparing, every leg failed: completion is still legal.
    let done = service
        .complete_execution(execution.execution_id, "op", None)
        .unwrap();
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.metrics.total_portions_delivered, 0);
    assert!((done.metrics.progress_ratio - 0.0).abs() < f64::EPSILON);
}

#[test]
fn cancelled_run_is_frozen_but_readable() {
    let (_dir, service, schedule_id) = seeded(vec![target("SDN 04", 100), target("SDN 07", 100)]);
    let execution = service.start_execution(schedule_id, "op", None).unwrap();
    let deliveries = service.list_deliveries(execution.execution_id).unwrap();

    service
        .start_delivery(deliveries[0].delivery_id, "driver", point())
        .unwrap();
    service
        .cancel_execution(execution.execution_id, "op", "volcanic ash advisory")
        .unwrap();

    // Historical record is intact and readable.
    let deliveries = service.list_deliveries(execution.execution_id).unwrap();
    assert_eq!(deliveries[0].status, DeliveryStatus::InTransit);
    assert_eq!(deliveries[1].status, DeliveryStatus::Pending);
    assert_eq!(deliveries[0].tracking_points.len(), 1);

    // Every further mutation is rejected.
    assert!(matches!(
        service.arrive_delivery(deliveries[0].delivery_id, "driver", point()),
        Err(ExecutionError::ExecutionClosed { .. })
    ));
    assert!(matches!(
        service.start_delivery(deliveries[1].delivery_id, "driver", point()),
        Err(ExecutionError::ExecutionClosed { .. })
    ));
    assert!(matches!(
        service.complete_execution(execution.execution_id, "op", None),
        Err(ExecutionError::InvalidStateTransition { .. })
    ));
}

#[test]
fn tracking_history_is_ordered_and_stale_points_rejected() {
    let (_dir, service, schedule_id) = seeded(vec![target("SDN 04", 100)]);
    let execution = service.start_execution(schedule_id, "op", None).unwrap();
    let deliveries = service.list_deliveries(execution.execution_id).unwrap();
    let id = deliveries[0].delivery_id;

    let start = Utc::now();
    service
        .start_delivery(
            id,
            "driver",
            TrackingPoint {
                recorded_at: start,
                latitude: -6.90,
                longitude: 107.60,
                speed_kmh: None,
            },
        )
        .unwrap();
    service
        .record_location(
            id,
            TrackingPoint {
                recorded_at: start + chrono::Duration::seconds(30),
                latitude: -6.91,
                longitude: 107.61,
                speed_kmh: Some(40.0),
            },
        )
        .unwrap();

    // A point older than the last one is a stale read from the device.
    let result = service.record_location(
        id,
        TrackingPoint {
            recorded_at: start - chrono::Duration::seconds(10),
            latitude: -6.92,
            longitude: 107.62,
            speed_kmh: None,
        },
    );
    assert!(matches!(result, Err(ExecutionError::StaleLocation { .. })));

    let history = service.tracking_history(id).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].recorded_at <= history[1].recorded_at);
}

#[test]
fn concurrent_completion_attempts_only_one_wins() {
    let (_dir, service, schedule_id) = seeded(vec![target("SDN 04", 100)]);
    let execution = service.start_execution(schedule_id, "op", None).unwrap();
    let deliveries = service.list_deliveries(execution.execution_id).unwrap();
    run_to_delivered(&service, deliveries[0].delivery_id, 100);

    let service = Arc::new(service);
    let execution_id = execution.execution_id;

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                service.complete_execution(execution_id, &format!("op-{i}"), None)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    for loss in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            loss,
            Err(ExecutionError::InvalidStateTransition { .. })
        ));
    }

    let execution = service.get_execution(execution_id).unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(AuditTrail::verify_chain(&service.config().audit_log).unwrap());
}

#[test]
fn concurrent_completes_on_one_delivery_apply_exactly_once() {
    let (_dir, service, schedule_id) = seeded(vec![target("SDN 04", 100)]);
    let execution = service.start_execution(schedule_id, "op", None).unwrap();
    let deliveries = service.list_deliveries(execution.execution_id).unwrap();
    let id = deliveries[0].delivery_id;

    service.start_delivery(id, "driver", point()).unwrap();
    service.arrive_delivery(id, "driver", point()).unwrap();

    let service = Arc::new(service);
    let handles: Vec<_> = [60u32, 80]
        .into_iter()
        .map(|portions| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                service.complete_delivery(
                    &CompleteDeliveryRequest {
                        delivery_id: id,
                        portions_delivered: portions,
                        beneficiaries_reached: portions,
                        quality_check: None,
                        signature: None,
                    },
                    "driver",
                )
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for loss in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            loss,
            Err(ExecutionError::InvalidDeliveryState { .. })
                | Err(ExecutionError::ConcurrentModification { .. })
        ));
    }

    // The winner's quantities were applied exactly once, not summed.
    let delivery = service.get_delivery(id).unwrap();
    assert_eq!(delivery.portions_delivered, winners[0].portions_delivered);
    let execution = service.get_execution(execution.execution_id).unwrap();
    assert_eq!(
        execution.metrics.total_portions_delivered,
        winners[0].portions_delivered
    );
}

#[test]
fn concurrent_delivery_mutations_serialize_per_execution() {
    let (_dir, service, schedule_id) = seeded(vec![
        target("SDN 04", 100),
        target("SDN 07", 100),
        target("SMP 02", 100),
        target("SMP 05", 100),
    ]);
    let execution = service.start_execution(schedule_id, "op", None).unwrap();
    let deliveries = service.list_deliveries(execution.execution_id).unwrap();

    let service = Arc::new(service);
    let handles: Vec<_> = deliveries
        .iter()
        .map(|d| {
            let service = Arc::clone(&service);
            let id = d.delivery_id;
            thread::spawn(move || {
                service.start_delivery(id, "driver", point())?;
                service.arrive_delivery(id, "driver", point())?;
                service.complete_delivery(
                    &CompleteDeliveryRequest {
                        delivery_id: id,
                        portions_delivered: 100,
                        beneficiaries_reached: 100,
                        quality_check: None,
                        signature: None,
                    },
                    "driver",
                )
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    // No lost updates: the aggregate saw all four completions.
    let execution = service.get_execution(execution.execution_id).unwrap();
    assert_eq!(execution.metrics.total_portions_delivered, 400);
    assert_eq!(execution.metrics.completed_delivery_count, 4);
    assert_eq!(execution.status, ExecutionStatus::Distributing);
    assert!(AuditTrail::verify_chain(&service.config().audit_log).unwrap());
}

#[test]
fn second_execution_allowed_after_first_is_terminal() {
    let dir = tempdir().unwrap();
    let config = DistConfig::for_data_dir(dir.path());
    let provider = FileScheduleProvider::new(&config.schedules_dir).unwrap();
    let schedule = Schedule::new("DST-2026-0002", 100, vec![target("SDN 04", 100)]);
    provider.save(&schedule).unwrap();
    let service = DistributionService::open(config).unwrap();

    let first = service
        .start_execution(schedule.schedule_id, "op", None)
        .unwrap();
    service
        .cancel_execution(first.execution_id, "op", "rescheduled to tomorrow")
        .unwrap();

    // Re-arm the schedule the way the scheduling side would.
    let mut rearmed = provider.fetch(schedule.schedule_id).unwrap();
    rearmed.status = ScheduleStatus::Planned;
    provider.save(&rearmed).unwrap();

    let second = service
        .start_execution(schedule.schedule_id, "op", None)
        .unwrap();
    assert_ne!(second.execution_id, first.execution_id);
    assert_eq!(second.status, ExecutionStatus::Preparing);
}
