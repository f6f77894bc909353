// ==========================================
// 麻醉科排班引擎 - 命令行入口
// ==========================================
// 用法: anesthesia-planning <db_path> <scenario.json>
// 行为: 读取场景参数 → 针对 SQLite 数据库运行模拟 → 以 JSON 输出结果
// ==========================================

use anesthesia_planning::config::ConfigManager;
use anesthesia_planning::engine::{EngineDeps, PlanningEngine};
use anesthesia_planning::{logging, ScenarioParameters, SqlitePlanningRepository};
use anyhow::{anyhow, bail, Context};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let (db_path, scenario_path) = match args.as_slice() {
        [_, db, scenario] => (db.as_str(), scenario.as_str()),
        _ => bail!("用法: anesthesia-planning <db_path> <scenario.json>"),
    };

    tracing::info!("==================================================");
    tracing::info!("{} v{}", anesthesia_planning::APP_NAME, anesthesia_planning::VERSION);
    tracing::info!("使用数据库: {}", db_path);
    tracing::info!("==================================================");

    let raw = std::fs::read_to_string(scenario_path)
        .with_context(|| format!("无法读取场景文件: {}", scenario_path))?;
    let parameters = ScenarioParameters::from_json(&raw).map_err(|e| anyhow!(e))?;

    let config = ConfigManager::new(db_path)?.load_engine_config()?;
    let repository = Arc::new(SqlitePlanningRepository::new(db_path)?);
    let engine = PlanningEngine::bootstrap(EngineDeps::new(repository, config)).await?;

    let scenario_name = std::path::Path::new(scenario_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("scenario");
    let scenario_id = engine
        .create_scenario(scenario_name, None, parameters, "cli")
        .await?;
    let result = engine.run_scenario_to_completion(&scenario_id).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if let Some(reason) = &result.error_message {
        tracing::warn!("模拟失败: {}", reason);
        std::process::exit(2);
    }
    Ok(())
}
