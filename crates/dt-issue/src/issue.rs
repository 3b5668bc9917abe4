// issue.rs — Issue records: problems observed during a distribution run.
//
// An issue belongs to exactly one execution and may reference any number
// of that execution's deliveries. Issues are never deleted; a resolution
// is attached once and the record becomes immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IssueError;

/// Category of a reported issue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// Vehicle breakdown on route.
    VehicleBreakdown,
    /// Weather-related disruption.
    WeatherDelay,
    /// Congestion or closed roads.
    TrafficJam,
    /// Couriers could not enter the target site.
    AccessDenied,
    /// Nobody authorized to receive at the target site.
    RecipientUnavailable,
    /// Food quality problem (spoilage, contamination, temperature).
    FoodQuality,
    /// Fewer portions on the vehicle than planned.
    Shortage,
    /// Anything that fits no other category.
    Other,
}

impl IssueType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vehicle_breakdown" => Some(IssueType::VehicleBreakdown),
            "weather_delay" => Some(IssueType::WeatherDelay),
            "traffic_jam" => Some(IssueType::TrafficJam),
            "access_denied" => Some(IssueType::AccessDenied),
            "recipient_unavailable" => Some(IssueType::RecipientUnavailable),
            "food_quality" => Some(IssueType::FoodQuality),
            "shortage" => Some(IssueType::Shortage),
            "other" => Some(IssueType::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IssueType::VehicleBreakdown => "vehicle_breakdown",
            IssueType::WeatherDelay => "weather_delay",
            IssueType::TrafficJam => "traffic_jam",
            IssueType::AccessDenied => "access_denied",
            IssueType::RecipientUnavailable => "recipient_unavailable",
            IssueType::FoodQuality => "food_quality",
            IssueType::Shortage => "shortage",
            IssueType::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// How badly the issue affects the run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl IssueSeverity {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(IssueSeverity::Low),
            "medium" => Some(IssueSeverity::Medium),
            "high" => Some(IssueSeverity::High),
            "critical" => Some(IssueSeverity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IssueSeverity::Low => "low",
            IssueSeverity::Medium => "medium",
            IssueSeverity::High => "high",
            IssueSeverity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Where the issue was observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The outcome attached when an issue is closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub notes: String,
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
}

/// A problem reported against a distribution execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub issue_id: Uuid,

    /// The execution this issue belongs to.
    pub execution_id: Uuid,

    /// Deliveries affected by the issue (may be empty for run-wide issues).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delivery_ids: Vec<Uuid>,

    pub issue_type: IssueType,
    pub severity: IssueSeverity,

    /// Free-text account of what happened.
    pub description: String,

    /// GPS position at report time, when the reporter had one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<IssueLocation>,

    pub reported_by: String,
    pub reported_at: DateTime<Utc>,

    /// Present once the issue has been resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl Issue {
    pub fn new(
        execution_id: Uuid,
        issue_type: IssueType,
        severity: IssueSeverity,
        description: impl Into<String>,
        reported_by: impl Into<String>,
    ) -> Self {
        Self {
            issue_id: Uuid::new_v4(),
            execution_id,
            delivery_ids: Vec::new(),
            issue_type,
            severity,
            description: description.into(),
            location: None,
            reported_by: reported_by.into(),
            reported_at: Utc::now(),
            resolution: None,
        }
    }

    pub fn with_deliveries(mut self, delivery_ids: Vec<Uuid>) -> Self {
        self.delivery_ids = delivery_ids;
        self
    }

    pub fn with_location(mut self, location: IssueLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Attach a resolution. An issue can be resolved exactly once.
    pub fn resolve(
        &mut self,
        notes: impl Into<String>,
        resolved_by: impl Into<String>,
    ) -> Result<(), IssueError> {
        if self.resolution.is_some() {
            return Err(IssueError::AlreadyResolved(self.issue_id));
        }
        self.resolution = Some(Resolution {
            notes: notes.into(),
            resolved_by: resolved_by.into(),
            resolved_at: Utc::now(),
        });
        Ok(())
    }
}
