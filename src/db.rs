// ==========================================
// 麻醉科排班引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout, 减少并发写入时的偶发 busy 错误
// - 提供建表入口 (幂等)
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout (毫秒)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明:
/// - foreign_keys 需要 "每个连接" 单独开启
/// - busy_timeout 需要 "每个连接" 单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 建表 (已存在则跳过), 并登记 schema_version
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS candidate_assignment (
            assignment_id TEXT PRIMARY KEY,
            staff_id TEXT NOT NULL,
            role TEXT NOT NULL,
            work_date TEXT NOT NULL,
            room_id TEXT,
            sector_id TEXT,
            site_id TEXT,
            shift_kind TEXT NOT NULL,
            start_at TEXT NOT NULL,
            end_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_candidate_assignment_date
            ON candidate_assignment (work_date);

        CREATE TABLE IF NOT EXISTS live_assignment (
            assignment_id TEXT NOT NULL,
            staff_id TEXT NOT NULL,
            role TEXT NOT NULL,
            work_date TEXT NOT NULL,
            room_id TEXT NOT NULL DEFAULT '',
            sector_id TEXT,
            site_id TEXT,
            shift_kind TEXT NOT NULL,
            start_at TEXT NOT NULL,
            end_at TEXT NOT NULL,
            source_result_id TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (staff_id, work_date, shift_kind, room_id)
        );
        CREATE INDEX IF NOT EXISTS idx_live_assignment_date
            ON live_assignment (work_date);

        CREATE TABLE IF NOT EXISTS leave_record (
            leave_id TEXT NOT NULL,
            staff_id TEXT NOT NULL,
            leave_date TEXT NOT NULL,
            rest_kind TEXT NOT NULL,
            source_scenario_id TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (staff_id, leave_date)
        );

        CREATE TABLE IF NOT EXISTS rule_config (
            rule_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            scope_type TEXT NOT NULL DEFAULT 'GLOBAL',
            scope_id TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            revision INTEGER NOT NULL DEFAULT 1,
            parameters_json TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS supervision_constraint (
            sector_id TEXT PRIMARY KEY,
            constraint_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );
        "#,
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version (若表不存在则返回 None)
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
