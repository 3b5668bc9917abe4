// aggregate.rs — Derives execution-level metrics from a set of deliveries.
//
// The aggregator is a pure function of delivery rows: feed it a snapshot,
// get the aggregate back. The service applies the result to the execution
// record inside the same lock as the triggering delivery write, so readers
// never observe an aggregate that disagrees with persisted delivery state.
// Recomputation is idempotent; last-writer-wins on the execution record is
// acceptable as long as the snapshot read was consistent with the write.

use crate::delivery::{Delivery, DeliveryStatus};
use crate::execution::{Execution, ExecutionMetrics};

/// Compute the aggregate metrics for one execution from its deliveries.
///
/// `issues_count` is owned by the issue tracker's recount path and is not
/// touched here — [`apply`] carries the previous value forward.
pub fn aggregate(deliveries: &[Delivery], planned_portions: u32) -> ExecutionMetrics {
    let mut metrics = ExecutionMetrics::default();
    metrics.delivery_count = deliveries.len() as u32;

    for delivery in deliveries {
        match delivery.status {
            DeliveryStatus::Delivered => {
                metrics.total_portions_delivered += delivery.portions_delivered;
                metrics.total_beneficiaries_reached += delivery.beneficiaries_reached;
                metrics.completed_delivery_count += 1;
            }
            DeliveryStatus::Failed => {
                metrics.completed_delivery_count += 1;
            }
            _ => {}
        }
    }

    metrics.progress_ratio = if planned_portions == 0 {
        0.0
    } else {
        f64::from(metrics.total_portions_delivered) / f64::from(planned_portions)
    };

    metrics
}

/// Recompute and write the aggregate onto an execution record.
///
/// The derived recompute always wins over manual progress corrections;
/// only `issues_count` survives, since it is recounted elsewhere.
pub fn apply(execution: &mut Execution, deliveries: &[Delivery]) {
    let issues_count = execution.metrics.issues_count;
    execution.metrics = aggregate(deliveries, execution.planned_portions);
    execution.metrics.issues_count = issues_count;
    execution.updated_at = chrono::Utc::now();
}
