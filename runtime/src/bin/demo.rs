//! Seathold Demo
//!
//! Simulates a handful of buyers competing for the same concert chart:
//! manual picks, best-available requests and general admission places,
//! followed by a booking pushed by the backend and token expiry.
//!
//! # Usage
//!
//! ```bash
//! SEATHOLD_HOLD_TTL_SECS=5 RUST_LOG=info,seathold_core=debug cargo run --bin seathold-demo
//! ```

use anyhow::Context;
use futures::future::join_all;
use rand::seq::SliceRandom;
use rand::Rng;
use seathold_core::catalog::BookingConfirmation;
use seathold_core::chart::{Category, ChartBuilder, ChartLayout};
use seathold_core::config::{ChartConfig, HoldConfig};
use seathold_core::notification::{BroadcastSink, EventSink, Notification};
use seathold_core::session::SessionMode;
use seathold_core::solver::BestAvailableRequest;
use seathold_core::types::{EventKey, SelectTarget};
use seathold_core::validation::{OrphanMode, SelectionValidator};
use seathold_runtime::metrics::MetricsRecorder;
use seathold_runtime::{HoldCoordinator, NoopConfirmationService, Sweeper};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EVENT: &str = "summer-festival";

#[derive(Debug, Clone)]
enum Plan {
    Pick(Vec<String>),
    BestAvailable(u32),
    Floor(u32),
}

fn concert_layout() -> anyhow::Result<ChartLayout> {
    let mut builder = ChartBuilder::new()
        .category(Category::new("1", "Stalls"))
        .category(Category::new("2", "Balcony"))
        .section("Main");
    for (row, category) in [("A", "1"), ("B", "1"), ("C", "2")] {
        let labels: Vec<String> = (1..=10).map(|n| format!("{row}-{n}")).collect();
        let seats: Vec<&str> = labels.iter().map(String::as_str).collect();
        builder = builder.row(row, category, &seats);
    }
    builder
        .general_admission("Floor", "2", 40)
        .build()
        .context("demo chart is invalid")
}

fn plans(buyers: usize) -> Vec<Plan> {
    let mut rng = rand::thread_rng();
    let rows = ["A", "B", "C"];
    (0..buyers)
        .map(|_| match rng.gen_range(0..3) {
            0 => {
                let row = rows.choose(&mut rng).copied().unwrap_or("A");
                let first = rng.gen_range(1..=9);
                Plan::Pick(vec![format!("{row}-{first}"), format!("{row}-{}", first + 1)])
            }
            1 => Plan::BestAvailable(rng.gen_range(2..=4)),
            _ => Plan::Floor(rng.gen_range(1..=6)),
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,seathold_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut metrics = MetricsRecorder::new();
    metrics.install()?;

    let config = HoldConfig::from_env();
    let coordinator = Arc::new(HoldCoordinator::for_layout(
        concert_layout()?,
        vec![EventKey::new(EVENT)],
        config.clone(),
        Arc::new(NoopConfirmationService),
    ));
    let sweeper = Sweeper::spawn(Arc::clone(&coordinator));

    println!("\n=== Seathold demo: {EVENT} ===");
    println!("hold ttl: {:?}, expiry: {:?}\n", config.hold_ttl, config.expiry_mode);

    let buyers = plans(6).into_iter().enumerate().map(|(n, plan)| {
        let coordinator = Arc::clone(&coordinator);
        async move {
            let sink = Arc::new(BroadcastSink::default());
            let mut notifications = sink.subscribe();
            let mut chart_config = ChartConfig::new([EventKey::new(EVENT)], SessionMode::Start);
            chart_config.selection_validators = vec![SelectionValidator::NoOrphanSeats {
                mode: OrphanMode::Lenient,
                enabled: true,
            }];
            let chart = coordinator
                .open_chart(chart_config, Arc::clone(&sink) as Arc<dyn EventSink>, None)
                .await?;

            let outcome = match &plan {
                Plan::Pick(labels) => chart
                    .select(labels.iter().map(|l| SelectTarget::object(l.as_str())).collect())
                    .await
                    .map(|report| format!("picked {} failed {}", report.selected.len(), report.failures.len())),
                Plan::BestAvailable(n) => chart
                    .select_best_available(BestAvailableRequest::number(*n))
                    .await
                    .map(|solution| format!("best available {:?}", solution.objects())),
                Plan::Floor(n) => chart
                    .select(vec![SelectTarget::object("Floor").with_amount(*n)])
                    .await
                    .map(|report| format!("floor places {:?}", report.selected)),
            };
            println!("buyer {n}: {plan:?} -> {}", outcome.unwrap_or_else(|e| e.to_string()));

            let mut invalid = 0;
            while let Ok(notification) = notifications.try_recv() {
                if matches!(notification, Notification::SelectionInvalid { .. }) {
                    invalid += 1;
                }
                tracing::debug!(buyer = n, notification = %serde_json::to_string(&notification)?, "Notification");
            }
            if invalid > 0 {
                println!("buyer {n}: selection left orphan seats");
            }
            anyhow::Ok(chart)
        }
    });

    let charts: Vec<_> = join_all(buyers)
        .await
        .into_iter()
        .collect::<anyhow::Result<Vec<_>>>()?;

    if let Some(chart) = charts.first() {
        let token = chart.hold_token();
        if let Err(err) = chart.validate().into_result() {
            println!("\nbuyer 0 cannot book yet: {err}");
        } else if let Some(item) = chart.selected_objects().into_iter().next() {
            let outcome = coordinator.confirm_booking(&BookingConfirmation {
                id: "order-1".to_string(),
                event: EventKey::new(EVENT),
                object: item.object.clone(),
                hold_token: token,
                ticket_type: item.ticket_type.clone(),
                quantity: item.quantity,
            });
            println!("\nbooked {} for buyer 0: {outcome:?}", item.object);
        }
    }

    let catalog = coordinator.catalog();
    if let Some(floor) = catalog.ga_availability(&"Floor".into()) {
        println!("floor: {floor:?}");
    }
    println!("live tokens: {}", coordinator.sessions().active_tokens());

    if config.hold_ttl <= Duration::from_secs(10) {
        println!("\nwaiting for holds to expire...");
        tokio::time::sleep(config.hold_ttl + config.sweep_interval * 2).await;
        println!("live tokens: {}", coordinator.sessions().active_tokens());
    }

    sweeper.shutdown().await;
    if let Some(rendered) = metrics.render() {
        println!("\n{rendered}");
    }
    Ok(())
}
