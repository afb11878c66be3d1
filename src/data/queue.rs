/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 阻塞队列与后台预取线程
 *
 * 预取线程从`free`队列取出空批次，用加载函数填满后放入`full`队列；
 * 消费者从`full`取批次，用完后归还到`free`。两边各自克隆队列句柄
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use tracing::{debug, info, warn};

use super::error::DataError;

/// 同时在途的批次数
pub const PREFETCH_COUNT: usize = 3;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 无界的多生产者多消费者队列，push从不阻塞，pop在队列为空时阻塞
#[derive(Debug)]
pub struct BlockingQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T> Clone for BlockingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn push(&self, item: T) {
        // 句柄自身持有接收端，无界通道的发送不会失败
        let _ = self.sender.send(item);
    }

    pub fn try_pop(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// 取一个元素；需要等待时先记录`msg`
    pub fn pop(&self, msg: &str) -> Result<T, DataError> {
        match self.receiver.try_recv() {
            Ok(item) => Ok(item),
            Err(TryRecvError::Empty) => {
                info!("{}", msg);
                self.receiver
                    .recv()
                    .map_err(|_| DataError::QueueClosed(msg.to_string()))
            }
            Err(TryRecvError::Disconnected) => Err(DataError::QueueClosed(msg.to_string())),
        }
    }

    /// 最多等待`timeout`；超时返回None
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// 后台预取线程。加载出错时把错误交给消费者后退出；析构时停止线程
#[derive(Debug)]
pub struct Prefetcher<B: Send + 'static> {
    free: BlockingQueue<B>,
    full: BlockingQueue<Result<B, DataError>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<B: Send + 'static> Prefetcher<B> {
    /// 以给定的空批次启动预取线程
    pub fn spawn<F>(batches: Vec<B>, mut load: F) -> Self
    where
        F: FnMut(&mut B) -> Result<(), DataError> + Send + 'static,
    {
        let free = BlockingQueue::new();
        let full = BlockingQueue::new();
        for batch in batches {
            free.push(batch);
        }
        let stop = Arc::new(AtomicBool::new(false));

        let (thread_free, thread_full, thread_stop) = (free.clone(), full.clone(), stop.clone());
        let handle = thread::spawn(move || {
            while !thread_stop.load(Ordering::Acquire) {
                let Some(mut batch) = thread_free.pop_timeout(STOP_POLL_INTERVAL) else {
                    continue;
                };
                match load(&mut batch) {
                    Ok(()) => thread_full.push(Ok(batch)),
                    Err(e) => {
                        warn!(error = %e, "预取批次失败，预取线程退出");
                        thread_full.push(Err(e));
                        break;
                    }
                }
            }
            debug!("预取线程已停止");
        });

        Self {
            free,
            full,
            stop,
            handle: Some(handle),
        }
    }

    /// 取下一个已填满的批次
    pub fn pop(&self, msg: &str) -> Result<B, DataError> {
        self.full.pop(msg)?
    }

    /// 归还用完的批次
    pub fn recycle(&self, batch: B) {
        self.free.push(batch);
    }
}

impl<B: Send + 'static> Drop for Prefetcher<B> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("预取线程异常退出");
            }
        }
    }
}
