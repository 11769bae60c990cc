//! 调度队列
//!
//! 每个渠道一条逻辑队列，将提交与投递解耦。渠道内按提交顺序 FIFO，
//! 重试调度器通过把条目的 `not_before` 推迟到未来实现延后重排。
//!
//! 认领契约：`claim` 弹出下一个 `not_before 已到` 的条目；没有就绪
//! 条目时挂起，直到有条目就绪、有新条目入队或收到关闭信号。
//! 弹出发生在互斥锁内，天然保证同一条目至多交给一个工作者——
//! 这是引擎并发安全的两根支柱之一（另一根是存储层的条件更新）。

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tracing::debug;

use notify_shared::clock::Clock;
use notify_shared::error::{NotifyError, Result};

use crate::types::{Channel, QueueItem};

// ---------------------------------------------------------------------------
// DispatchQueue — 单渠道队列
// ---------------------------------------------------------------------------

/// 堆内条目
///
/// 按 (not_before, 入队序号) 排序：先比可投递时间，相同时按入队
/// 顺序保证渠道内 FIFO。
struct HeapEntry {
    not_before: DateTime<Utc>,
    seq: u64,
    item: QueueItem,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.not_before == other.not_before && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.not_before
            .cmp(&other.not_before)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

struct QueueInner {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    next_seq: u64,
}

/// 单渠道调度队列
///
/// 容量有上限：入队失败返回 Dispatch 错误，由协调器回滚提交状态，
/// 避免接受无法兑现的通知。
pub struct DispatchQueue {
    channel: Channel,
    capacity: usize,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

/// claim 在一轮检查后需要等待的方式
enum WaitPlan {
    /// 队列为空，等到有条目入队为止
    UntilPush,
    /// 队首尚未就绪，最多等这么久后重新检查
    Until(std::time::Duration),
}

impl DispatchQueue {
    pub fn new(channel: Channel, capacity: usize) -> Self {
        Self {
            channel,
            capacity,
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// 入队一个调度条目
    ///
    /// 队列已满时返回 Dispatch 错误且不入队。
    pub fn push(&self, item: QueueItem) -> Result<()> {
        {
            let mut inner = self.inner.lock();

            if inner.heap.len() >= self.capacity {
                return Err(NotifyError::Dispatch(format!(
                    "{} 渠道队列已满（容量 {}）",
                    self.channel, self.capacity
                )));
            }

            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(Reverse(HeapEntry {
                not_before: item.not_before,
                seq,
                item,
            }));
        }

        // 锁外唤醒一个等待中的工作者
        self.notify.notify_one();
        Ok(())
    }

    /// 认领下一个就绪条目
    ///
    /// 没有就绪条目时挂起；收到关闭信号后返回 None，
    /// 已在处理中的条目不受影响。
    pub async fn claim(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        clock: &dyn Clock,
    ) -> Option<QueueItem> {
        loop {
            if *shutdown.borrow() {
                return None;
            }

            // 先注册唤醒，再检查队列，避免检查与等待之间丢失通知
            let notified = self.notify.notified();

            let plan = {
                let mut inner = self.inner.lock();
                let now = clock.now();

                match inner.heap.peek() {
                    Some(Reverse(head)) if head.not_before <= now => {
                        let Reverse(entry) = inner.heap.pop().expect("peek 后 pop 必然成功");
                        debug!(
                            channel = %self.channel,
                            notification_id = %entry.item.notification_id,
                            attempt_number = entry.item.attempt_number,
                            "队列条目已认领"
                        );
                        return Some(entry.item);
                    }
                    Some(Reverse(head)) => {
                        let wait = (head.not_before - now)
                            .to_std()
                            .unwrap_or(std::time::Duration::ZERO);
                        WaitPlan::Until(wait)
                    }
                    None => WaitPlan::UntilPush,
                }
            };

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    // 发送端被丢弃也视为关闭
                    if changed.is_err() {
                        return None;
                    }
                }

                _ = notified => {}

                _ = async {
                    match plan {
                        WaitPlan::Until(wait) => tokio::time::sleep(wait).await,
                        WaitPlan::UntilPush => std::future::pending().await,
                    }
                } => {}
            }
        }
    }

    /// 当前排队条目数（含尚未就绪的）
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// DispatchQueues — 渠道队列集合
// ---------------------------------------------------------------------------

/// 全渠道队列集合
///
/// 协调器和工作者池共享同一实例；每个渠道的队列相互独立。
pub struct DispatchQueues {
    queues: HashMap<Channel, Arc<DispatchQueue>>,
}

impl DispatchQueues {
    pub fn new(capacity: usize) -> Self {
        let queues = Channel::ALL
            .iter()
            .map(|&channel| (channel, Arc::new(DispatchQueue::new(channel, capacity))))
            .collect();

        Self { queues }
    }

    pub fn get(&self, channel: Channel) -> &Arc<DispatchQueue> {
        // 构造时已覆盖全部渠道变体
        self.queues
            .get(&channel)
            .expect("每个渠道都应有对应队列")
    }

    /// 全部队列中的条目总数
    pub fn total_len(&self) -> usize {
        self.queues.values().map(|q| q.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
