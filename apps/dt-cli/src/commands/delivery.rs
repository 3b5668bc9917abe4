// delivery.rs — Delivery subcommands: the courier-side lifecycle plus
// photo/signature side channels.

use chrono::Utc;
use clap::Subcommand;
use dt_execution::{
    CompleteDeliveryRequest, Delivery, DistributionService, PhotoType, QualityCheck, Signature,
    TrackingPoint,
};

#[derive(Subcommand)]
pub enum DeliveryCommands {
    /// List the deliveries of an execution.
    List {
        /// Execution ID.
        execution_id: String,
    },
    /// Show details for one delivery.
    Status {
        /// Delivery ID.
        id: String,
    },
    /// Depart for the target site.
    Start {
        /// Delivery ID.
        id: String,
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lng: f64,
        /// Speed in km/h.
        #[arg(long)]
        speed: Option<f64>,
    },
    /// Append a GPS tracking point while in transit.
    Track {
        /// Delivery ID.
        id: String,
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lng: f64,
        /// Speed in km/h.
        #[arg(long)]
        speed: Option<f64>,
    },
    /// Record arrival at the target site.
    Arrive {
        /// Delivery ID.
        id: String,
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lng: f64,
    },
    /// Record the handover and close the delivery.
    Complete {
        /// Delivery ID.
        id: String,
        /// Portions actually handed over.
        #[arg(long)]
        portions: u32,
        /// Beneficiaries actually reached.
        #[arg(long)]
        beneficiaries: u32,
        /// Attach a quality check.
        #[arg(long)]
        qc: bool,
        /// Food temperature was out of range.
        #[arg(long)]
        temp_bad: bool,
        /// Packaging was damaged.
        #[arg(long)]
        packaging_bad: bool,
        /// Quantity did not match the manifest.
        #[arg(long)]
        quantity_bad: bool,
        /// Quality check notes.
        #[arg(long)]
        qc_notes: Option<String>,
    },
    /// Mark the delivery as failed.
    Fail {
        /// Delivery ID.
        id: String,
        /// Why the delivery failed.
        #[arg(long)]
        reason: String,
    },
    /// Attach a photo URL.
    Photo {
        /// Delivery ID.
        id: String,
        /// Photo type: departure, arrival, quality, issue, other.
        #[arg(long, default_value = "other")]
        photo_type: String,
        /// URL of the uploaded photo.
        #[arg(long)]
        url: String,
        #[arg(long)]
        caption: Option<String>,
    },
    /// Attach the recipient signature.
    Sign {
        /// Delivery ID.
        id: String,
        /// URL of the signature image.
        #[arg(long)]
        image_url: String,
        /// Recipient name.
        #[arg(long)]
        name: String,
        /// Recipient title (e.g., "Kepala Sekolah").
        #[arg(long)]
        title: Option<String>,
    },
    /// Remove an attached signature.
    Unsign {
        /// Delivery ID.
        id: String,
    },
    /// Show the GPS trail.
    History {
        /// Delivery ID.
        id: String,
    },
}

pub fn execute(
    cmd: &DeliveryCommands,
    service: &DistributionService,
    actor: &str,
) -> anyhow::Result<()> {
    match cmd {
        DeliveryCommands::List { execution_id } => {
            let deliveries = service.list_deliveries(uuid::Uuid::parse_str(execution_id)?)?;
            list_deliveries(&deliveries);
            Ok(())
        }
        DeliveryCommands::Status { id } => {
            let delivery = service.get_delivery(uuid::Uuid::parse_str(id)?)?;
            show_status(&delivery);
            Ok(())
        }
        DeliveryCommands::Start { id, lat, lng, speed } => {
            let delivery =
                service.start_delivery(uuid::Uuid::parse_str(id)?, actor, point(*lat, *lng, *speed))?;
            println!("Departed for {}: {}", delivery.target_name, delivery.status);
            Ok(())
        }
        DeliveryCommands::Track { id, lat, lng, speed } => {
            let delivery =
                service.record_location(uuid::Uuid::parse_str(id)?, point(*lat, *lng, *speed))?;
            println!("Tracked ({} point(s) total).", delivery.tracking_points.len());
            Ok(())
        }
        DeliveryCommands::Arrive { id, lat, lng } => {
            let delivery =
                service.arrive_delivery(uuid::Uuid::parse_str(id)?, actor, point(*lat, *lng, None))?;
            println!("Arrived at {}.", delivery.target_name);
            Ok(())
        }
        DeliveryCommands::Complete {
            id,
            portions,
            beneficiaries,
            qc,
            temp_bad,
            packaging_bad,
            quantity_bad,
            qc_notes,
        } => {
            let quality_check = qc.then(|| QualityCheck {
                passed: !temp_bad && !packaging_bad && !quantity_bad,
                temperature_ok: !temp_bad,
                packaging_ok: !packaging_bad,
                quantity_ok: !quantity_bad,
                notes: qc_notes.clone(),
            });
            let delivery = service.complete_delivery(
                &CompleteDeliveryRequest {
                    delivery_id: uuid::Uuid::parse_str(id)?,
                    portions_delivered: *portions,
                    beneficiaries_reached: *beneficiaries,
                    quality_check,
                    signature: None,
                },
                actor,
            )?;
            println!(
                "Delivered {} portions to {} ({} beneficiaries).",
                delivery.portions_delivered, delivery.target_name, delivery.beneficiaries_reached
            );
            Ok(())
        }
        DeliveryCommands::Fail { id, reason } => {
            let delivery = service.fail_delivery(uuid::Uuid::parse_str(id)?, actor, reason)?;
            println!("Delivery to {} marked failed.", delivery.target_name);
            Ok(())
        }
        DeliveryCommands::Photo {
            id,
            photo_type,
            url,
            caption,
        } => {
            let photo_type = PhotoType::parse(photo_type)
                .ok_or_else(|| anyhow::anyhow!("unknown photo type: {photo_type}"))?;
            let delivery = service.attach_photo(
                uuid::Uuid::parse_str(id)?,
                actor,
                photo_type,
                url,
                caption.clone(),
            )?;
            println!("Photo attached ({} total).", delivery.photos.len());
            Ok(())
        }
        DeliveryCommands::Sign {
            id,
            image_url,
            name,
            title,
        } => {
            service.attach_signature(
                uuid::Uuid::parse_str(id)?,
                actor,
                Signature {
                    image_url: image_url.clone(),
                    recipient_name: name.clone(),
                    recipient_title: title.clone(),
                    signed_at: Utc::now(),
                },
            )?;
            println!("Signature attached: {name}");
            Ok(())
        }
        DeliveryCommands::Unsign { id } => {
            service.remove_signature(uuid::Uuid::parse_str(id)?, actor)?;
            println!("Signature removed.");
            Ok(())
        }
        DeliveryCommands::History { id } => {
            let points = service.tracking_history(uuid::Uuid::parse_str(id)?)?;
            if points.is_empty() {
                println!("No tracking points.");
                return Ok(());
            }
            println!("{:<26} {:>10} {:>11} {:>7}", "TIMESTAMP", "LAT", "LNG", "KM/H");
            println!("{}", "-".repeat(58));
            for p in &points {
                println!(
                    "{:<26} {:>10.5} {:>11.5} {:>7}",
                    p.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    p.latitude,
                    p.longitude,
                    p.speed_kmh
                        .map(|s| format!("{s:.0}"))
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
            Ok(())
        }
    }
}

fn point(lat: f64, lng: f64, speed: Option<f64>) -> TrackingPoint {
    TrackingPoint {
        recorded_at: Utc::now(),
        latitude: lat,
        longitude: lng,
        speed_kmh: speed,
    }
}

fn list_deliveries(deliveries: &[Delivery]) {
    if deliveries.is_empty() {
        println!("No deliveries found.");
        return;
    }

    println!(
        "{:<38} {:<20} {:<11} {:>9}",
        "ID", "TARGET", "STATUS", "PORTIONS"
    );
    println!("{}", "-".repeat(82));

    for d in deliveries {
        println!(
            "{:<38} {:<20} {:<11} {:>4}/{:<4}",
            d.delivery_id,
            truncate(&d.target_name, 18),
            d.status.to_string(),
            d.portions_delivered,
            d.planned_portions,
        );
    }
    println!("\n{} delivery(ies) total.", deliveries.len());
}

fn show_status(d: &Delivery) {
    println!("Delivery:  {}", d.delivery_id);
    println!("Execution: {}", d.execution_id);
    println!("Target:    {} ({})", d.target_name, d.target_address);
    println!("Status:    {}", d.status);
    println!("Portions:  {}/{}", d.portions_delivered, d.planned_portions);
    println!("Reached:   {}", d.beneficiaries_reached);
    println!("Tracking:  {} point(s)", d.tracking_points.len());
    println!("Photos:    {}", d.photos.len());
    if let Some(ref qc) = d.quality_check {
        println!("QC:        {}", if qc.passed { "passed" } else { "FAILED" });
    }
    if let Some(ref sig) = d.signature {
        println!("Signed by: {}", sig.recipient_name);
    }
    if let Some(ref reason) = d.failure_reason {
        println!("Failed:    {reason}");
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max - 3])
    } else {
        s.to_string()
    }
}
