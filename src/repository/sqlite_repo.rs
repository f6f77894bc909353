// ==========================================
// 麻醉科排班引擎 - SQLite 仓储实现
// ==========================================
// 职责: PlanningRepository 的 rusqlite 实现
// 红线: Repository 不含业务逻辑, 只负责数据访问
// 红线: write_assignments 在单个事务内完成, 失败即回滚
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::assignment::{CandidateAssignment, DateRange, LeaveRecord, ScheduleKey};
use crate::domain::rule::{RuleConfig, RuleScope};
use crate::domain::supervision::SupervisionConstraint;
use crate::domain::types::{RestKind, RuleKindTag, ShiftKind, StaffRole};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::planning_repo::{PlanningRepository, WriteBatch, WriteReceipt};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const ASSIGNMENT_COLUMNS: &str = "assignment_id, staff_id, role, work_date, room_id, sector_id, \
     site_id, shift_kind, start_at, end_at";

/// 排班行 (枚举字段仍为文本, 转换时校验)
struct AssignmentRow {
    id: String,
    staff_id: String,
    role: String,
    date: NaiveDate,
    room_id: Option<String>,
    sector_id: Option<String>,
    site_id: Option<String>,
    shift_kind: String,
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl AssignmentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            staff_id: row.get(1)?,
            role: row.get(2)?,
            date: row.get(3)?,
            room_id: row.get(4)?,
            sector_id: row.get(5)?,
            site_id: row.get(6)?,
            shift_kind: row.get(7)?,
            start: row.get(8)?,
            end: row.get(9)?,
        })
    }

    fn into_domain(self) -> RepositoryResult<CandidateAssignment> {
        let role = StaffRole::from_str(&self.role).map_err(|message| {
            RepositoryError::FieldValueError {
                field: "role".to_string(),
                message,
            }
        })?;
        let shift_kind = ShiftKind::from_str(&self.shift_kind).map_err(|message| {
            RepositoryError::FieldValueError {
                field: "shift_kind".to_string(),
                message,
            }
        })?;
        Ok(CandidateAssignment {
            id: self.id,
            staff_id: self.staff_id,
            role,
            date: self.date,
            // live_assignment 以空串表示无手术间
            room_id: self.room_id.filter(|r| !r.is_empty()),
            sector_id: self.sector_id,
            site_id: self.site_id,
            shift_kind,
            start: self.start,
            end: self.end,
        })
    }
}

// ==========================================
// SqlitePlanningRepository
// ==========================================
pub struct SqlitePlanningRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePlanningRepository {
    /// 创建新的仓储实例 (自动建表)
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

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ===== 数据准备 =====

    /// 批量写入候选排班 (INSERT OR REPLACE)
    pub fn insert_candidate_assignments(
        &self,
        assignments: &[CandidateAssignment],
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut count = 0;
        for a in assignments {
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO candidate_assignment ({}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    ASSIGNMENT_COLUMNS
                ),
                params![
                    a.id,
                    a.staff_id,
                    a.role.as_str(),
                    a.date,
                    a.room_id,
                    a.sector_id,
                    a.site_id,
                    a.shift_kind.as_str(),
                    a.start,
                    a.end,
                ],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    /// 写入或更新规则配置
    pub fn upsert_rule_config(&self, config: &RuleConfig) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO rule_config (
                rule_id, kind, priority, scope_type, scope_id, active, revision, parameters_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                config.id,
                config.kind.as_str(),
                config.priority,
                config.scope.type_str(),
                config.scope.scope_id(),
                config.active,
                config.revision,
                serde_json::to_string(&config.parameters)?,
            ],
        )?;
        Ok(())
    }

    /// 写入或更新扇区督导约束
    pub fn upsert_supervision_constraint(
        &self,
        constraint: &SupervisionConstraint,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO supervision_constraint (sector_id, constraint_json) VALUES (?1, ?2)",
            params![constraint.sector_id, serde_json::to_string(constraint)?],
        )?;
        Ok(())
    }

    /// 读取全部休假记录
    pub fn list_leaves(&self) -> RepositoryResult<Vec<LeaveRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT leave_id, staff_id, leave_date, rest_kind, source_scenario_id \
             FROM leave_record ORDER BY leave_date, staff_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, NaiveDate>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, staff_id, date, rest_kind, source_scenario_id)| {
                let rest_kind = RestKind::from_str(&rest_kind).map_err(|message| {
                    RepositoryError::FieldValueError {
                        field: "rest_kind".to_string(),
                        message,
                    }
                })?;
                Ok(LeaveRecord {
                    id,
                    staff_id,
                    date,
                    rest_kind,
                    source_scenario_id,
                })
            })
            .collect()
    }

    fn query_assignments(
        &self,
        table: &str,
        range: &DateRange,
    ) -> RepositoryResult<Vec<CandidateAssignment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE work_date BETWEEN ?1 AND ?2 \
             ORDER BY work_date, staff_id, start_at, assignment_id",
            ASSIGNMENT_COLUMNS, table
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![range.start_date, range.end_date], AssignmentRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(AssignmentRow::into_domain).collect()
    }

    fn query_rules(&self, scope: &RuleScope) -> RepositoryResult<Vec<RuleConfig>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT rule_id, kind, priority, scope_type, scope_id, active, revision, parameters_json
            FROM rule_config
            WHERE scope_type = ?1 AND IFNULL(scope_id, '') = IFNULL(?2, '')
            ORDER BY rule_id
            "#,
        )?;
        let rows = stmt
            .query_map(params![scope.type_str(), scope.scope_id()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i32>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, u32>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, kind, priority, scope_type, scope_id, active, revision, parameters)| {
                    let kind = RuleKindTag::from_str(&kind).map_err(|message| {
                        RepositoryError::FieldValueError {
                            field: "kind".to_string(),
                            message,
                        }
                    })?;
                    let scope = RuleScope::from_parts(&scope_type, scope_id).map_err(|message| {
                        RepositoryError::FieldValueError {
                            field: "scope_type".to_string(),
                            message,
                        }
                    })?;
                    Ok(RuleConfig {
                        id,
                        kind,
                        priority,
                        scope,
                        active,
                        revision,
                        parameters: serde_json::from_str(&parameters)?,
                    })
                },
            )
            .collect()
    }

    fn query_supervision(&self, sector_id: &str) -> RepositoryResult<Option<SupervisionConstraint>> {
        let conn = self.get_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT constraint_json FROM supervision_constraint WHERE sector_id = ?1",
                params![sector_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// 单事务写入: 清理区间 → upsert 排班 → 写入休假
    fn write_batch(&self, batch: &WriteBatch) -> RepositoryResult<WriteReceipt> {
        let mut batch_keys: HashSet<ScheduleKey> = HashSet::new();
        for a in &batch.assignments {
            if !batch_keys.insert(a.schedule_key()) {
                return Err(RepositoryError::UniqueConstraintViolation(format!(
                    "批次内排班键重复: staff={}, date={}, shift={}",
                    a.staff_id, a.date, a.shift_kind
                )));
            }
        }

        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut receipt = WriteReceipt::default();

        if batch.clear_existing {
            let existing: Vec<(String, NaiveDate, String, String)> = {
                let mut stmt = tx.prepare(
                    "SELECT staff_id, work_date, shift_kind, room_id FROM live_assignment \
                     WHERE work_date BETWEEN ?1 AND ?2",
                )?;
                let rows = stmt
                    .query_map(params![batch.range.start_date, batch.range.end_date], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };
            for (staff_id, date, shift_kind, room_id) in existing {
                let kept = ShiftKind::from_str(&shift_kind)
                    .map(|kind| {
                        let room = Some(room_id.clone()).filter(|r| !r.is_empty());
                        batch_keys.contains(&(staff_id.clone(), date, kind, room))
                    })
                    .unwrap_or(false);
                if !kept {
                    tx.execute(
                        "DELETE FROM live_assignment \
                         WHERE staff_id = ?1 AND work_date = ?2 AND shift_kind = ?3 AND room_id = ?4",
                        params![staff_id, date, shift_kind, room_id],
                    )?;
                    receipt.removed += 1;
                }
            }
        }

        for a in &batch.assignments {
            let room = a.room_id.clone().unwrap_or_default();
            let exists: bool = tx
                .query_row(
                    "SELECT 1 FROM live_assignment \
                     WHERE staff_id = ?1 AND work_date = ?2 AND shift_kind = ?3 AND room_id = ?4",
                    params![a.staff_id, a.date, a.shift_kind.as_str(), room],
                    |_row| Ok(true),
                )
                .optional()?
                .unwrap_or(false);

            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO live_assignment ({}, source_result_id, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, datetime('now'))",
                    ASSIGNMENT_COLUMNS
                ),
                params![
                    a.id,
                    a.staff_id,
                    a.role.as_str(),
                    a.date,
                    room,
                    a.sector_id,
                    a.site_id,
                    a.shift_kind.as_str(),
                    a.start,
                    a.end,
                    batch.source_result_id,
                ],
            )?;

            if exists {
                receipt.updated += 1;
            } else {
                receipt.created += 1;
            }
        }

        for leave in &batch.leaves {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO leave_record (
                    leave_id, staff_id, leave_date, rest_kind, source_scenario_id
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    leave.id,
                    leave.staff_id,
                    leave.date,
                    leave.rest_kind.as_str(),
                    leave.source_scenario_id,
                ],
            )?;
            receipt.leaves_created += 1;
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(receipt)
    }
}

#[async_trait]
impl PlanningRepository for SqlitePlanningRepository {
    async fn load_candidate_assignments(
        &self,
        range: &DateRange,
    ) -> RepositoryResult<Vec<CandidateAssignment>> {
        self.query_assignments("candidate_assignment", range)
    }

    async fn load_rules(&self, scope: &RuleScope) -> RepositoryResult<Vec<RuleConfig>> {
        self.query_rules(scope)
    }

    async fn load_supervision_constraints(
        &self,
        sector_id: &str,
    ) -> RepositoryResult<Option<SupervisionConstraint>> {
        self.query_supervision(sector_id)
    }

    async fn write_assignments(&self, batch: WriteBatch) -> RepositoryResult<WriteReceipt> {
        self.write_batch(&batch)
    }

    async fn load_live_schedule_snapshot(
        &self,
        range: &DateRange,
    ) -> RepositoryResult<Vec<CandidateAssignment>> {
        self.query_assignments("live_assignment", range)
    }
}
