// ==========================================
// 麻醉科排班引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// 红线: 格式错误的配置直接拒绝, 不静默回退默认值
// ==========================================

use crate::config::engine_config::{EngineConfig, FatigueConfig};
use crate::db::open_sqlite_connection;
use crate::domain::simulation::CoverageTargets;
use crate::engine::error::EngineError;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        crate::db::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明: 为保证连接行为一致, 会对传入连接再次应用统一 PRAGMA (幂等)
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&guard)?;
        }
        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 从 config_kv 表读取配置值 (scope_id='global')
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global 配置 (UPSERT)
    pub fn set_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取所有 global 配置的快照 (JSON 格式)
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }
        Ok(serde_json::to_string(&json!(config_map))?)
    }

    /// 加载引擎配置: 默认值 + config_kv 覆写, 最后整体校验
    pub fn load_engine_config(&self) -> Result<EngineConfig, EngineError> {
        let mut config = EngineConfig::default();

        if let Some(v) = self.parse_number(config_keys::CHUNK_DAYS)? {
            config.simulation.chunk_days = v;
        }
        if let Some(v) = self.parse_number(config_keys::CHUNKING_THRESHOLD_DAYS)? {
            config.simulation.chunking_threshold_days = v;
        }
        if let Some(v) = self.parse_number(config_keys::MAX_SPAN_DAYS)? {
            config.simulation.max_span_days = v;
        }
        if let Some(v) = self.parse_number(config_keys::WORKER_COUNT)? {
            config.simulation.worker_count = v;
        }
        if let Some(v) = self.parse_number(config_keys::RUN_TIMEOUT_SECS)? {
            config.simulation.run_timeout_secs = v;
        }
        if let Some(v) = self.parse_json::<FatigueConfig>(config_keys::FATIGUE_CONFIG)? {
            config.fatigue = v;
        }
        if let Some(v) = self.parse_json::<CoverageTargets>(config_keys::COVERAGE_TARGETS)? {
            config.coverage = v;
        }

        config.validate().map_err(|message| EngineError::InvalidConfig {
            key: "engine".to_string(),
            message,
        })?;
        debug!(?config, "引擎配置加载完成");
        Ok(config)
    }

    fn parse_number<T: FromStr>(&self, key: &str) -> Result<Option<T>, EngineError> {
        match self.get_config_value(key)? {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| EngineError::InvalidConfig {
                    key: key.to_string(),
                    message: format!("无法解析为数值: {}", raw),
                }),
        }
    }

    fn parse_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, EngineError> {
        match self.get_config_value(key)? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| EngineError::InvalidConfig {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
        }
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 模拟运行
    pub const CHUNK_DAYS: &str = "simulation.chunk_days";
    pub const CHUNKING_THRESHOLD_DAYS: &str = "simulation.chunking_threshold_days";
    pub const MAX_SPAN_DAYS: &str = "simulation.max_span_days";
    pub const WORKER_COUNT: &str = "simulation.worker_count";
    pub const RUN_TIMEOUT_SECS: &str = "simulation.run_timeout_secs";

    // 疲劳积分 (JSON)
    pub const FATIGUE_CONFIG: &str = "fatigue.config";

    // 覆盖目标 (JSON)
    pub const COVERAGE_TARGETS: &str = "coverage.targets";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ShiftKind;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_missing_keys_fall_back_to_defaults() {
        let config = manager().load_engine_config().unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_overrides_applied() {
        let m = manager();
        m.set_config_value(config_keys::CHUNK_DAYS, "3").unwrap();
        m.set_config_value(config_keys::MAX_SPAN_DAYS, "30").unwrap();
        m.set_config_value(
            config_keys::FATIGUE_CONFIG,
            r#"{"shiftPoints": {"GARDE": 40}, "alertThreshold": 45}"#,
        )
        .unwrap();

        let config = m.load_engine_config().unwrap();
        assert_eq!(config.simulation.chunk_days, 3);
        assert_eq!(config.simulation.max_span_days, 30);
        assert_eq!(config.fatigue.points_for(ShiftKind::Garde), 40.0);
        assert_eq!(config.fatigue.points_for(ShiftKind::Astreinte), 0.0);
        assert_eq!(config.fatigue.alert_threshold, 45.0);

        let snapshot = m.get_config_snapshot().unwrap();
        assert!(snapshot.contains("simulation.chunk_days"));
    }

    #[test]
    fn test_malformed_values_rejected() {
        let m = manager();
        m.set_config_value(config_keys::RUN_TIMEOUT_SECS, "soon").unwrap();
        let err = m.load_engine_config().unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig { ref key, .. } if key == config_keys::RUN_TIMEOUT_SECS));

        let m = manager();
        m.set_config_value(config_keys::CHUNK_DAYS, "0").unwrap();
        assert!(m.load_engine_config().is_err());
    }
}
