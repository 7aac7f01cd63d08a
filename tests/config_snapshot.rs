use anyhow::Result;
use chrono::Utc;
use seaplane_dispatch::core::orders::OrderFilter;
use seaplane_dispatch::domain::model::OrderStatus;
use seaplane_dispatch::config::toml_config::SeedSummary;
use seaplane_dispatch::utils::validation::Validate;
use seaplane_dispatch::{DispatchService, LocalStorage, Scheduler, SchedulerConfig, TomlConfig};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DEMO: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/dispatch-config.toml");

fn seeded() -> Result<(TomlConfig, SeedSummary, Arc<DispatchService>)> {
    let scenario = TomlConfig::from_file(DEMO)?;
    scenario.validate()?;
    let service = Arc::new(DispatchService::new(&scenario));
    let summary = scenario.seed(&service)?;
    Ok((scenario, summary, service))
}

#[tokio::test]
async fn test_demo_scenario_seeds_cleanly() -> Result<()> {
    let (scenario, seeded, service) = seeded()?;

    assert_eq!(
        service.network().ports(&Default::default()).len(),
        scenario.ports.len()
    );
    assert_eq!(service.fleet().seaplanes().len(), scenario.seaplanes.len());
    assert_eq!(
        seeded.orders_accepted + seeded.orders_rejected,
        scenario.orders.len()
    );
    assert_eq!(
        service.orders().orders(&OrderFilter::default()).len(),
        seeded.orders_accepted
    );

    let cormorant = service.network().port_by_name("Punta Cormorant").unwrap();
    assert_eq!(cormorant.locker_count, 3);
    assert_eq!(service.lockers().empty_count(cormorant.id), 3);
    Ok(())
}

#[tokio::test]
async fn test_scheduler_runs_demo_and_writes_snapshot() -> Result<()> {
    let (_, _, service) = seeded()?;
    let temp_dir = TempDir::new()?;

    let scheduler = Scheduler::new(
        Arc::clone(&service),
        SchedulerConfig {
            interval: Duration::from_millis(5),
            max_cycles: Some(12),
            minutes_per_tick: 15,
            dry_run: false,
        },
    );
    let summary = scheduler
        .run(Utc::now(), std::future::pending::<()>())
        .await;

    assert_eq!(summary.cycles, 12);
    assert!(summary.legs >= 1);
    assert!(summary.arrivals >= 1);
    // Punta Cormorant 只有 3 個櫃子，5 箱的訂單必有剩餘
    assert!(summary.remainders >= 1);

    let partial = service.orders().orders(&OrderFilter {
        client: None,
        status: Some(OrderStatus::PartiallyDelivered),
    });
    assert!(!partial.is_empty());
    assert!(service
        .orders()
        .orders(&OrderFilter::default())
        .iter()
        .any(|o| o.parent.is_some()));

    let storage = LocalStorage::new(temp_dir.path());
    let bytes = service.save_snapshot(&storage, "snapshot.json").await?;
    assert!(bytes > 0);

    let content = std::fs::read_to_string(temp_dir.path().join("snapshot.json"))?;
    let json: serde_json::Value = serde_json::from_str(&content)?;

    let ports = json["ports"].as_array().unwrap();
    assert_eq!(ports.len(), 24);
    assert!(ports.iter().all(|p| p["lockers"].is_array()));
    assert!(ports.iter().any(|p| p["warehouse"] == true));

    let seaplanes = json["seaplanes"].as_array().unwrap();
    assert_eq!(seaplanes.len(), 12);
    assert!(seaplanes.iter().all(|s| s["route"].is_boolean()));

    assert!(!json["assignments"].as_array().unwrap().is_empty());

    let boxes = json["boxes"].as_array().unwrap();
    assert!(boxes.iter().any(|b| b["status"] == "DELIVERED"));
    assert!(boxes.iter().any(|b| b["status"] == "REQUEUED"));
    assert!(boxes.iter().all(|b| b["number"].as_u64().unwrap() >= 1));
    Ok(())
}

#[tokio::test]
async fn test_dry_run_commits_nothing() -> Result<()> {
    let (_, _, service) = seeded()?;
    let scheduler = Scheduler::new(
        Arc::clone(&service),
        SchedulerConfig {
            interval: Duration::from_millis(5),
            max_cycles: Some(3),
            minutes_per_tick: 15,
            dry_run: true,
        },
    );

    let summary = scheduler
        .run(Utc::now(), std::future::pending::<()>())
        .await;

    assert_eq!(summary.cycles, 3);
    assert_eq!(summary.legs, 0);
    assert!(service.engine().assignments().is_empty());
    assert!(service
        .orders()
        .orders(&OrderFilter::default())
        .iter()
        .all(|o| o.status == OrderStatus::Pending));
    Ok(())
}
