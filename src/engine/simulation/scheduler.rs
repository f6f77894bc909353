// ==========================================
// 麻醉科排班引擎 - 分块调度器
// ==========================================
// 职责: 在有界工作池中并行执行分块, 收集全部分块输出
// 工具: tokio 阻塞线程池 + 信号量限流 + JoinSet
// 红线: 任一分块失败 / 取消 / 超时 ⇒ 整体失败, 丢弃全部部分结果
// 红线: 输出按分块序号排序, 与完成顺序无关
// ==========================================

use super::chunk::{run_chunk, ChunkJob, ChunkOutput, ChunkTask};
use crate::engine::error::{EngineError, EngineResult};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// 分块调度器
#[derive(Debug, Clone)]
pub struct ChunkScheduler {
    worker_count: usize,
    timeout: Duration,
}

impl ChunkScheduler {
    pub fn new(worker_count: usize, timeout: Duration) -> Self {
        Self {
            worker_count: worker_count.max(1),
            timeout,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// 执行全部分块
    ///
    /// # 参数
    /// - job: 各分块共享的只读输入
    /// - tasks: 分块任务
    /// - cancel: 取消信号 (值变为 true 即取消)
    /// - on_progress: 每完成一个分块回调 (已完成数, 总数)
    ///
    /// # 返回
    /// - Ok: 按分块序号排序的输出
    /// - Err: 第一个失败 / Cancelled / Timeout
    pub async fn run<F>(
        &self,
        job: Arc<ChunkJob>,
        tasks: Vec<ChunkTask>,
        mut cancel: watch::Receiver<bool>,
        mut on_progress: F,
    ) -> EngineResult<Vec<ChunkOutput>>
    where
        F: FnMut(usize, usize),
    {
        let total = tasks.len();
        if *cancel.borrow() {
            return Err(EngineError::Cancelled);
        }

        let permits = Arc::new(Semaphore::new(self.worker_count));
        let abort = Arc::new(AtomicBool::new(false));
        let mut set = JoinSet::new();

        for task in tasks {
            let job = Arc::clone(&job);
            let permits = Arc::clone(&permits);
            let abort = Arc::clone(&abort);
            set.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| EngineError::Internal(format!("工作池已关闭: {}", e)))?;
                let index = task.index;
                let joined = tokio::task::spawn_blocking(move || {
                    if abort.load(Ordering::SeqCst) {
                        return Err(EngineError::Cancelled);
                    }
                    debug!(chunk = task.index, start = %task.range.start_date, end = %task.range.end_date, "分块开始");
                    match catch_unwind(AssertUnwindSafe(|| run_chunk(&job, &task))) {
                        Ok(outcome) => outcome,
                        Err(_) => Err(EngineError::ChunkExecution {
                            chunk_index: task.index,
                            message: "分块工作线程异常终止".to_string(),
                        }),
                    }
                })
                .await;
                joined.unwrap_or_else(|e| {
                    Err(EngineError::ChunkExecution {
                        chunk_index: index,
                        message: e.to_string(),
                    })
                })
            });
        }

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        let mut cancel_open = true;
        let mut outputs = Vec::with_capacity(total);

        while !set.is_empty() {
            tokio::select! {
                biased;
                changed = cancel.changed(), if cancel_open => {
                    match changed {
                        Ok(()) if *cancel.borrow() => {
                            warn!("模拟运行被取消, 中止全部分块");
                            Self::shutdown(&abort, &mut set);
                            return Err(EngineError::Cancelled);
                        }
                        Ok(()) => {}
                        // 取消端已释放, 之后不再可能取消
                        Err(_) => cancel_open = false,
                    }
                }
                _ = &mut deadline => {
                    warn!(timeout_secs = self.timeout.as_secs(), "模拟运行超时, 中止全部分块");
                    Self::shutdown(&abort, &mut set);
                    return Err(EngineError::Timeout {
                        timeout_secs: self.timeout.as_secs(),
                    });
                }
                joined = set.join_next() => {
                    let Some(joined) = joined else { break };
                    let outcome = joined.unwrap_or_else(|e| {
                        Err(EngineError::Internal(format!("分块任务异常: {}", e)))
                    });
                    match outcome {
                        Ok(output) => {
                            outputs.push(output);
                            on_progress(outputs.len(), total);
                        }
                        Err(e) => {
                            warn!(error = %e, "分块执行失败, 丢弃全部部分结果");
                            Self::shutdown(&abort, &mut set);
                            return Err(e);
                        }
                    }
                }
            }
        }

        outputs.sort_by_key(|o| o.task.index);
        Ok(outputs)
    }

    /// 通知排队中的分块放弃执行, 并中止等待中的任务
    fn shutdown(abort: &AtomicBool, set: &mut JoinSet<EngineResult<ChunkOutput>>) {
        abort.store(true, Ordering::SeqCst);
        set.abort_all();
    }
}
