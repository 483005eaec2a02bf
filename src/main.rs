//! Tripwise 演示入口
//!
//! 加载配置、注册内置 Agent、规划一次行程并以 JSON 打印行程与系统健康。
//!
//! 用法：`tripwise [--config <file.toml>] [--request <trip.json>] [--watch]`
//! - `--request`：从 JSON 读取 TripRequest，缺省用内置示例
//! - `--watch`：打印后保持运行（健康巡检），直到 Ctrl+C / SIGTERM

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use tripwise::{
    agents::default_agents,
    config::load_config,
    coordinator::{FamilyMember, FamilyProfile, TravelCoordinator, TripRequest},
    core::{run_with_graceful_shutdown, ShutdownCleanup, ShutdownCoordinator, ShutdownManager},
    observability,
};

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    request: Option<PathBuf>,
    watch: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => args.config = Some(iter.next().context("--config needs a path")?.into()),
            "--request" => args.request = Some(iter.next().context("--request needs a path")?.into()),
            "--watch" => args.watch = true,
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

fn sample_request() -> anyhow::Result<TripRequest> {
    Ok(TripRequest {
        destination: "Lisbon".into(),
        origin: None,
        start_date: NaiveDate::from_ymd_opt(2026, 7, 4).context("invalid sample date")?,
        end_date: NaiveDate::from_ymd_opt(2026, 7, 11).context("invalid sample date")?,
        family: FamilyProfile {
            family_name: "Silva".into(),
            members: vec![
                FamilyMember { name: "Ana".into(), age: 41 },
                FamilyMember { name: "Rui".into(), age: 43 },
                FamilyMember { name: "Leo".into(), age: 9 },
                FamilyMember { name: "Mia".into(), age: 6 },
            ],
            budget: Some(9000.0),
            home_address: Some("Boston".into()),
        },
        budget: None,
        preferences: vec!["beach".into(), "museums".into()],
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    let config = load_config(args.config.clone()).context("Failed to load configuration")?;
    observability::init_with_level(&config.app.log_level);

    let request = match &args.request {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read trip request {}", path.display()))?;
            serde_json::from_str(&raw).context("Invalid trip request JSON")?
        }
        None => sample_request()?,
    };

    let agents = config.configure_agents(default_agents());
    let coordinator = Arc::new(
        TravelCoordinator::with_agents(config.coordinator_settings(), config.manager_settings(), agents)
            .await
            .context("Failed to register agents")?,
    );
    coordinator.start_background_tasks();

    let plan = coordinator.plan_trip(&request).await.context("Trip planning failed")?;
    println!("{}", serde_json::to_string_pretty(&plan)?);

    let health = coordinator.system_health().await;
    println!("{}", serde_json::to_string_pretty(&health)?);

    let manager = Arc::new(ShutdownManager::new());
    let mut cleanup = ShutdownCoordinator::new(Arc::clone(&manager));
    cleanup.register_shared(Arc::clone(&coordinator) as Arc<dyn ShutdownCleanup>);

    if args.watch {
        tracing::info!("Watching agent health; press Ctrl+C to exit");
        let token = manager.token();
        run_with_graceful_shutdown(
            Arc::clone(&manager),
            async move { token.cancelled().await },
            || async move {
                cleanup.run_cleanup().await;
            },
        )
        .await;
    } else {
        cleanup.run_cleanup().await;
    }

    Ok(())
}
