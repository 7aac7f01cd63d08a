use chrono::Utc;
use clap::Parser;
use seaplane_dispatch::utils::error::ErrorSeverity;
use seaplane_dispatch::utils::{logger, validation::Validate};
use seaplane_dispatch::{
    CliConfig, DispatchError, DispatchService, LocalStorage, Scheduler, SchedulerConfig,
    TomlConfig,
};
use std::sync::Arc;
use std::time::Duration;

fn report_failure(stage: &str, e: &DispatchError) -> ! {
    tracing::error!(
        "❌ {} failed: {} (Category: {:?}, Severity: {:?})",
        stage,
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}

fn load_scenario(path: &str) -> seaplane_dispatch::Result<TomlConfig> {
    let scenario = TomlConfig::from_file(path)?;
    scenario.validate()?;
    Ok(scenario)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("🚀 Starting seaplane-dispatch");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    if let Err(e) = cli.validate() {
        report_failure("Configuration validation", &e);
    }

    let scenario = match load_scenario(&cli.config) {
        Ok(scenario) => scenario,
        Err(e) => report_failure("Loading scenario", &e),
    };

    let service = Arc::new(DispatchService::new(&scenario));
    let seeded = match scenario.seed(&service) {
        Ok(seeded) => seeded,
        Err(e) => report_failure("Seeding scenario", &e),
    };
    tracing::info!(
        "✅ Scenario '{}' ready: {} ports, {} seaplanes, {} pending orders ({} rejected)",
        scenario.scenario.name,
        seeded.ports,
        seeded.seaplanes,
        seeded.orders_accepted,
        seeded.orders_rejected
    );
    if cli.dry_run {
        tracing::info!("🔍 Dry run: cycles are planned but nothing is committed");
    }

    let scheduler = Scheduler::new(
        Arc::clone(&service),
        SchedulerConfig {
            interval: Duration::from_millis(cli.interval_ms),
            max_cycles: Some(u32::try_from(cli.cycles).unwrap_or(u32::MAX)),
            minutes_per_tick: cli.minutes_per_tick,
            dry_run: cli.dry_run,
        },
    );
    let summary = scheduler
        .run(Utc::now(), async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await;

    println!("✅ Dispatch finished after {} cycles", summary.cycles);
    println!(
        "✈️  {} legs, {} boxes dispatched, {} arrivals, {} remainders re-queued",
        summary.legs, summary.boxes_dispatched, summary.arrivals, summary.remainders
    );
    println!(
        "⏳ {} deferrals, {} failures, {} orders still in the backlog",
        summary.deferred,
        summary.failed,
        service.orders().dispatchable().len()
    );

    if let Some(path) = &cli.snapshot {
        let storage = LocalStorage::new(".");
        match service.save_snapshot(&storage, path).await {
            Ok(bytes) => println!("📁 Snapshot saved to: {} ({} bytes)", path, bytes),
            Err(e) => report_failure("Writing snapshot", &e),
        }
    }

    Ok(())
}
