// delivery.rs — Delivery: one target-site leg of an execution.
//
// A delivery is owned exclusively by its execution and carries its own
// lifecycle:
//   Pending → InTransit → Arrived → Delivered
//   (or Failed from any non-terminal state)
//
// While in transit it accumulates GPS tracking points, which must arrive
// with non-decreasing timestamps — history is never silently reordered.
// Quantities are only finalized on the terminal transition: Delivered sets
// them from the courier's report, Failed forces them to zero.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExecutionError;

/// The lifecycle state of a Delivery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Provisioned with the execution, waiting for departure.
    Pending,
    /// Courier on the way; tracking points accumulate.
    InTransit,
    /// Courier at the target site.
    Arrived,
    /// Food handed over, quantities finalized. Terminal.
    Delivered,
    /// Leg abandoned; quantities forced to zero. Terminal.
    Failed,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::InTransit => write!(f, "in_transit"),
            DeliveryStatus::Arrived => write!(f, "arrived"),
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

impl DeliveryStatus {
    /// Parse a status name as it appears in JSON ("in_transit").
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "in_transit" => Some(DeliveryStatus::InTransit),
            "arrived" => Some(DeliveryStatus::Arrived),
            "delivered" => Some(DeliveryStatus::Delivered),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }

    /// Delivered and Failed accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Failed)
    }

    /// Check whether transitioning from this state to `next` is valid.
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        // Failure is allowed from any non-terminal state.
        if next == DeliveryStatus::Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (DeliveryStatus::Pending, DeliveryStatus::InTransit)
                | (DeliveryStatus::InTransit, DeliveryStatus::Arrived)
                | (DeliveryStatus::Arrived, DeliveryStatus::Delivered)
        )
    }
}

/// A single timestamped GPS observation for a delivery in transit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingPoint {
    pub recorded_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
}

impl TrackingPoint {
    /// Reject coordinates outside the valid GPS range before any mutation.
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ExecutionError::validation(
                "latitude",
                format!("{} is outside [-90, 90]", self.latitude),
            ));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ExecutionError::validation(
                "longitude",
                format!("{} is outside [-180, 180]", self.longitude),
            ));
        }
        Ok(())
    }
}

/// What a delivery photo documents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhotoType {
    Departure,
    Arrival,
    Quality,
    Issue,
    Other,
}

impl PhotoType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "departure" => Some(PhotoType::Departure),
            "arrival" => Some(PhotoType::Arrival),
            "quality" => Some(PhotoType::Quality),
            "issue" => Some(PhotoType::Issue),
            "other" => Some(PhotoType::Other),
            _ => None,
        }
    }
}

/// A photo attached to a delivery. The bytes live in an external blob
/// store — the engine only keeps the URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Photo {
    pub photo_type: PhotoType,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// Recipient signature captured at the target site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signature {
    /// URL of the signature image in the blob store.
    pub image_url: String,
    pub recipient_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_title: Option<String>,
    pub signed_at: DateTime<Utc>,
}

/// Result of the on-site quality check performed at completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityCheck {
    pub passed: bool,
    pub temperature_ok: bool,
    pub packaging_ok: bool,
    pub quantity_ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A Delivery — one target-site leg within an Execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    /// Unique identifier for this delivery.
    pub delivery_id: Uuid,

    /// The owning execution.
    pub execution_id: Uuid,

    /// Target site name (e.g., a school).
    pub target_name: String,

    /// Target site address.
    pub target_address: String,

    /// Current lifecycle state.
    pub status: DeliveryStatus,

    /// Portions planned for this target, copied from the schedule.
    pub planned_portions: u32,

    /// Portions actually handed over. Zero until Delivered; forced to
    /// zero on Failed.
    pub portions_delivered: u32,

    /// Beneficiaries actually reached. Same finalization rule as portions.
    pub beneficiaries_reached: u32,

    /// On-site quality check result, recorded at completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_check: Option<QualityCheck>,

    /// Recipient signature, attachable from Arrived onward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,

    /// Photos documenting the leg.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<Photo>,

    /// GPS trail captured while in transit, ordered by timestamp.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tracking_points: Vec<TrackingPoint>,

    /// Why the leg failed, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// When the courier departed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departed_at: Option<DateTime<Utc>>,

    /// When the courier arrived at the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrived_at: Option<DateTime<Utc>>,

    /// When the leg reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// When this record was created.
    pub created_at: DateTime<Utc>,

    /// When this record was last updated.
    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency token, bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
}

impl Delivery {
    /// Create a new Pending delivery for a target of the given execution.
    pub fn new(
        execution_id: Uuid,
        target_name: impl Into<String>,
        target_address: impl Into<String>,
        planned_portions: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            delivery_id: Uuid::new_v4(),
            execution_id,
            target_name: target_name.into(),
            target_address: target_address.into(),
            status: DeliveryStatus::Pending,
            planned_portions,
            portions_delivered: 0,
            beneficiaries_reached: 0,
            quality_check: None,
            signature: None,
            photos: Vec::new(),
            tracking_points: Vec::new(),
            failure_reason: None,
            departed_at: None,
            arrived_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Transition to a new state. Returns an error if the transition is
    /// illegal from the current state.
    pub fn transition(&mut self, next: DeliveryStatus) -> Result<(), ExecutionError> {
        if !self.status.can_transition_to(next) {
            return Err(ExecutionError::InvalidDeliveryState {
                delivery_id: self.delivery_id,
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Append a tracking point, enforcing coordinate validity and
    /// monotonically non-decreasing timestamps. Out-of-order points are
    /// rejected rather than reordered.
    pub fn record_point(&mut self, point: TrackingPoint) -> Result<(), ExecutionError> {
        point.validate()?;
        if let Some(last) = self.tracking_points.last() {
            if point.recorded_at < last.recorded_at {
                return Err(ExecutionError::StaleLocation {
                    delivery_id: self.delivery_id,
                    last: last.recorded_at,
                    got: point.recorded_at,
                });
            }
        }
        self.tracking_points.push(point);
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_delivery() -> Delivery {
        Delivery::new(Uuid::new_v4(), "SDN 04 Menteng", "Jl. Pegangsaan Timur 1", 120)
    }

    fn point_at(ts: DateTime<Utc>) -> TrackingPoint {
        TrackingPoint {
            recorded_at: ts,
            latitude: -6.2,
            longitude: 106.8,
            speed_kmh: Some(32.0),
        }
    }

    #[test]
    fn new_delivery_starts_pending_with_zero_quantities() {
        let d = test_delivery();
        assert_eq!(d.status, DeliveryStatus::Pending);
        assert_eq!(d.planned_portions, 120);
        assert_eq!(d.portions_delivered, 0);
        assert_eq!(d.beneficiaries_reached, 0);
        assert!(d.tracking_points.is_empty());
    }

    #[test]
    fn valid_forward_transitions() {
        let mut d = test_delivery();
        d.transition(DeliveryStatus::InTransit).unwrap();
        d.transition(DeliveryStatus::Arrived).unwrap();
        d.transition(DeliveryStatus::Delivered).unwrap();
    }

    #[test]
    fn fail_allowed_from_any_non_terminal_state() {
        let mut pending = test_delivery();
        pending.transition(DeliveryStatus::Failed).unwrap();

        let mut in_transit = test_delivery();
        in_transit.transition(DeliveryStatus::InTransit).unwrap();
        in_transit.transition(DeliveryStatus::Failed).unwrap();

        let mut arrived = test_delivery();
        arrived.transition(DeliveryStatus::InTransit).unwrap();
        arrived.transition(DeliveryStatus::Arrived).unwrap();
        arrived.transition(DeliveryStatus::Failed).unwrap();
    }

    #[test]
    fn no_transition_out_of_terminal_states() {
        let mut delivered = test_delivery();
        delivered.transition(DeliveryStatus::InTransit).unwrap();
        delivered.transition(DeliveryStatus::Arrived).unwrap();
        delivered.transition(DeliveryStatus::Delivered).unwrap();
        assert!(delivered.transition(DeliveryStatus::Failed).is_err());
        assert!(delivered.transition(DeliveryStatus::InTransit).is_err());

        let mut failed = test_delivery();
        failed.transition(DeliveryStatus::Failed).unwrap();
        assert!(failed.transition(DeliveryStatus::InTransit).is_err());
        assert!(failed.transition(DeliveryStatus::Delivered).is_err());
    }

    #[test]
    fn skipping_states_is_rejected() {
        let mut d = test_delivery();
        let result = d.transition(DeliveryStatus::Arrived);
        assert!(matches!(
            result,
            Err(ExecutionError::InvalidDeliveryState { .. })
        ));
        assert_eq!(d.status, DeliveryStatus::Pending);

        let result = d.transition(DeliveryStatus::Delivered);
        assert!(result.is_err());
    }

    #[test]
    fn tracking_points_accept_non_decreasing_timestamps() {
        let mut d = test_delivery();
        let t0 = Utc::now();
        d.record_point(point_at(t0)).unwrap();
        // Equal timestamp is allowed (two fixes in the same second).
        d.record_point(point_at(t0)).unwrap();
        d.record_point(point_at(t0 + Duration::seconds(15))).unwrap();
        assert_eq!(d.tracking_points.len(), 3);
    }

    #[test]
    fn out_of_order_tracking_point_is_rejected() {
        let mut d = test_delivery();
        let t0 = Utc::now();
        d.record_point(point_at(t0)).unwrap();

        let result = d.record_point(point_at(t0 - Duration::seconds(10)));
        assert!(matches!(result, Err(ExecutionError::StaleLocation { .. })));
        // History unchanged.
        assert_eq!(d.tracking_points.len(), 1);
    }

    #[test]
    fn tracking_point_coordinates_are_validated() {
        let mut d = test_delivery();
        let bad_lat = TrackingPoint {
            recorded_at: Utc::now(),
            latitude: 91.0,
            longitude: 0.0,
            speed_kmh: None,
        };
        assert!(matches!(
            d.record_point(bad_lat),
            Err(ExecutionError::Validation { .. })
        ));

        let bad_lng = TrackingPoint {
            recorded_at: Utc::now(),
            latitude: 0.0,
            longitude: -200.0,
            speed_kmh: None,
        };
        assert!(matches!(
            d.record_point(bad_lng),
            Err(ExecutionError::Validation { .. })
        ));
        assert!(d.tracking_points.is_empty());
    }

    #[test]
    fn serialization_round_trip() {
        let mut d = test_delivery();
        d.record_point(point_at(Utc::now())).unwrap();
        d.photos.push(Photo {
            photo_type: PhotoType::Departure,
            url: "blob://photos/1.jpg".to_string(),
            caption: None,
            uploaded_at: Utc::now(),
        });

        let json = serde_json::to_string_pretty(&d).unwrap();
        let restored: Delivery = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.delivery_id, d.delivery_id);
        assert_eq!(restored.tracking_points, d.tracking_points);
        assert_eq!(restored.photos, d.photos);
    }

    #[test]
    fn empty_collections_omitted_from_json() {
        let d = test_delivery();
        let json = serde_json::to_string(&d).unwrap();
        assert!(!json.contains("photos"));
        assert!(!json.contains("tracking_points"));
        assert!(!json.contains("signature"));
    }
}
