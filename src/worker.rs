//! 后台任务
//!
//! 每个耗时操作（建立索引、线性扫描、多索引搜索）在独立的任务中运行，
//! 通过通道向调用方发送进度与唯一的终止事件，调用方可以随时请求停止。

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::{JoinHandle, spawn_blocking};

use crate::cache::IndexCache;
use crate::error::{EngineError, Result};
use crate::extractor::{FeatureExtractor, extract_guarded};
use crate::indexer::{IndexOutcome, Indexer};
use crate::scan::{self, ScanOutcome};
use crate::search::{self, MultiSearch, SearchResult};

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const COMMITTED: u8 = 2;

/// 取消标志
///
/// 标志只会从活动状态转为已取消或已提交之一，转换后不再改变。
/// 任务在写入结果前调用 [`CancelFlag::commit`]，之后的停止请求被忽略。
#[derive(Debug, Clone)]
pub struct CancelFlag(Arc<AtomicU8>);

impl Default for CancelFlag {
    fn default() -> Self {
        Self(Arc::new(AtomicU8::new(ACTIVE)))
    }
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求取消，已提交的任务不受影响
    pub fn cancel(&self) {
        let _ = self.0.compare_exchange(ACTIVE, CANCELLED, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst) == CANCELLED
    }

    /// 尝试进入提交阶段，已被取消时返回 `false`
    pub fn commit(&self) -> bool {
        match self.0.compare_exchange(ACTIVE, COMMITTED, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => true,
            Err(state) => state == COMMITTED,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.0.load(Ordering::SeqCst) == COMMITTED
    }
}

/// 任务发送给调用方的事件
#[derive(Debug)]
pub enum RunEvent<T> {
    /// 进度，0 到 100，单调不减
    Progress(u8),
    Completed(T),
    /// 任务失败，附带可读的原因
    Failed(String),
    Cancelled,
}

impl<T> RunEvent<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunEvent::Progress(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    /// 任务正在写入结果，不再响应停止请求
    Committing,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed | RunState::Cancelled)
    }
}

fn lock(state: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 任务一侧的事件发送器
///
/// 进度与终止事件都在持有状态锁时检查取消标志，
/// 因此停止请求之后不会再有进度或结果送达，只会有一个取消事件。
struct Reporter<T> {
    tx: UnboundedSender<RunEvent<T>>,
    cancel: CancelFlag,
    state: Arc<Mutex<RunState>>,
    last: u8,
    finished: bool,
}

impl<T> Reporter<T> {
    fn start(&self) {
        let mut state = lock(&self.state);
        if *state == RunState::Idle {
            *state = RunState::Running;
        }
    }

    fn progress(&mut self, value: u8) {
        let value = value.min(100);
        let state = lock(&self.state);
        if self.cancel.is_cancelled() || state.is_terminal() || value < self.last {
            return;
        }
        self.last = value;
        let _ = self.tx.send(RunEvent::Progress(value));
    }

    /// `Ok(None)` 表示任务观察到了取消请求
    fn finish(&mut self, result: Result<Option<T>>) {
        let mut state = lock(&self.state);
        if self.finished {
            return;
        }
        self.finished = true;
        let event = match result {
            _ if self.cancel.is_cancelled() => RunEvent::Cancelled,
            Ok(Some(value)) => RunEvent::Completed(value),
            Ok(None) => RunEvent::Cancelled,
            Err(e) => RunEvent::Failed(e.to_string()),
        };
        *state = match event {
            RunEvent::Completed(_) => RunState::Completed,
            RunEvent::Cancelled => RunState::Cancelled,
            _ => RunState::Failed,
        };
        debug!("任务结束: {:?}", *state);
        let _ = self.tx.send(event);
    }

    fn fail(&mut self, reason: &str) {
        let mut state = lock(&self.state);
        if self.finished {
            return;
        }
        self.finished = true;
        *state = RunState::Failed;
        let _ = self.tx.send(RunEvent::Failed(reason.to_string()));
    }
}

impl<T> Drop for Reporter<T> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("任务异常退出");
            self.fail("任务异常退出");
        }
    }
}

/// 调用方一侧的任务句柄
pub struct RunHandle<T> {
    events: UnboundedReceiver<RunEvent<T>>,
    cancel: CancelFlag,
    state: Arc<Mutex<RunState>>,
    task: JoinHandle<()>,
}

impl<T> RunHandle<T> {
    /// 接收下一个事件，终止事件之后返回 `None`
    pub async fn recv(&mut self) -> Option<RunEvent<T>> {
        self.events.recv().await
    }

    /// 请求停止，任务已经结束或正在提交时不做任何事
    pub fn stop(&self) {
        let state = lock(&self.state);
        if !state.is_terminal() {
            self.cancel.cancel();
        }
    }

    pub fn state(&self) -> RunState {
        match *lock(&self.state) {
            RunState::Running if self.cancel.is_committed() => RunState::Committing,
            state => state,
        }
    }

    /// 丢弃进度，等待终止事件
    pub async fn wait(mut self) -> RunEvent<T> {
        while let Some(event) = self.events.recv().await {
            if event.is_terminal() {
                let _ = self.task.await;
                return event;
            }
        }
        RunEvent::Failed("任务异常退出".to_string())
    }
}

fn channel<T>() -> (Reporter<T>, UnboundedReceiver<RunEvent<T>>, CancelFlag, Arc<Mutex<RunState>>) {
    let (tx, rx) = unbounded_channel();
    let cancel = CancelFlag::new();
    let state = Arc::new(Mutex::new(RunState::Idle));
    let reporter =
        Reporter { tx, cancel: cancel.clone(), state: state.clone(), last: 0, finished: false };
    (reporter, rx, cancel, state)
}

/// 在阻塞线程池中运行 `f`
///
/// `f` 返回 `Ok(None)` 表示它观察到了取消请求。
pub fn spawn<T, F>(f: F) -> RunHandle<T>
where
    T: Send + 'static,
    F: FnOnce(&CancelFlag, &mut dyn FnMut(u8)) -> Result<Option<T>> + Send + 'static,
{
    let (mut reporter, events, cancel, state) = channel();
    let task = spawn_blocking(move || {
        reporter.start();
        let cancel = reporter.cancel.clone();
        let result = catch_unwind(AssertUnwindSafe(|| {
            f(&cancel, &mut |value| reporter.progress(value))
        }));
        match result {
            Ok(result) => reporter.finish(result),
            Err(_) => reporter.fail("任务异常退出"),
        }
    });
    RunHandle { events, cancel, state, task }
}

/// 在后台建立或更新索引，完成时返回索引路径
pub fn spawn_index(indexer: Indexer, cache: Arc<IndexCache>) -> RunHandle<PathBuf> {
    spawn(move |cancel, progress| {
        Ok(match indexer.run(&cache, cancel, progress)? {
            IndexOutcome::Completed(path) => Some(path),
            IndexOutcome::Cancelled => None,
        })
    })
}

/// 在后台逐一比较目录中的图片
pub fn spawn_scan(
    query: PathBuf,
    folder: PathBuf,
    extractor: Arc<dyn FeatureExtractor>,
    threshold: f32,
    limit: usize,
) -> RunHandle<Vec<SearchResult>> {
    spawn(move |cancel, progress| {
        Ok(
            match scan::scan_image(&query, &folder, extractor.as_ref(), threshold, limit, cancel, progress)? {
                ScanOutcome::Completed(results) => Some(results),
                ScanOutcome::Cancelled => None,
            },
        )
    })
}

/// 在后台提取查询图片的特征，然后并发搜索多个索引
pub fn spawn_index_search(
    query: PathBuf,
    keys: Vec<PathBuf>,
    extractor: Arc<dyn FeatureExtractor>,
    cache: Arc<IndexCache>,
    threshold: f32,
    limit: usize,
) -> RunHandle<MultiSearch> {
    let (mut reporter, events, cancel, state) = channel();
    let task = tokio::spawn(async move {
        reporter.start();
        let features = spawn_blocking({
            let extractor = extractor.clone();
            let query = query.clone();
            move || extract_guarded(extractor.as_ref(), &query)
        })
        .await
        .ok()
        .flatten();
        let Some(features) = features else {
            reporter.finish(Err(EngineError::FeatureExtractionFailed(query)));
            return;
        };
        reporter.progress(30);
        if reporter.cancel.is_cancelled() {
            reporter.finish(Ok(None));
            return;
        }

        let found =
            search::search_many(cache, extractor, Arc::new(features), &keys, threshold, limit).await;
        reporter.progress(100);
        reporter.finish(Ok(Some(found)));
    });
    RunHandle { events, cancel, state, task }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::indexer::tests::{ScoreExtractor, write_images};

    #[tokio::test]
    async fn test_completed() {
        let mut handle = spawn(|_, progress| {
            for p in [10, 5, 50, 100] {
                progress(p);
            }
            Ok(Some(42))
        });
        let mut progress = vec![];
        let terminal = loop {
            match handle.recv().await {
                Some(RunEvent::Progress(p)) => progress.push(p),
                Some(event) => break event,
                None => panic!("no terminal event"),
            }
        };
        // 倒退的进度不会发送
        assert_eq!(progress, vec![10, 50, 100]);
        assert!(matches!(terminal, RunEvent::Completed(42)));
        assert!(handle.recv().await.is_none());
        assert_eq!(handle.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn test_failed() {
        let handle =
            spawn::<(), _>(|_, _| Err(EngineError::NoImagesFound(PathBuf::from("/empty"))));
        match handle.wait().await {
            RunEvent::Failed(reason) => assert!(reason.contains("/empty")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panic_is_failed() {
        let handle = spawn::<(), _>(|_, _| panic!("boom"));
        assert!(matches!(handle.wait().await, RunEvent::Failed(_)));
    }

    #[tokio::test]
    async fn test_cancel_suppresses_completion() {
        let (started_tx, started_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel::<()>();
        let mut handle = spawn(move |_, progress| {
            progress(20);
            started_tx.send(()).unwrap();
            resume_rx.recv().unwrap();
            // 任务没有检查取消标志，但结果不会送达
            progress(90);
            Ok(Some("done"))
        });
        tokio::task::spawn_blocking(move || started_rx.recv().unwrap()).await.unwrap();
        handle.stop();
        resume_tx.send(()).unwrap();

        let mut events = vec![];
        while let Some(event) = handle.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RunEvent::Progress(20)));
        assert!(matches!(events[1], RunEvent::Cancelled));
        assert_eq!(handle.state(), RunState::Cancelled);
    }

    #[test]
    fn test_cancel_flag_commit() {
        let flag = CancelFlag::new();
        assert!(flag.commit());
        flag.cancel();
        assert!(!flag.is_cancelled());
        assert!(flag.commit());

        let flag = CancelFlag::new();
        flag.cancel();
        assert!(!flag.commit());
        assert!(flag.is_cancelled());
        assert!(!flag.is_committed());
    }

    #[tokio::test]
    async fn test_stop_while_committing_is_ignored() {
        let (committed_tx, committed_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel::<()>();
        let handle = spawn(move |cancel, _| {
            if !cancel.commit() {
                return Ok(None);
            }
            committed_tx.send(()).unwrap();
            resume_rx.recv().unwrap();
            Ok(Some("saved"))
        });
        tokio::task::spawn_blocking(move || committed_rx.recv().unwrap()).await.unwrap();
        assert_eq!(handle.state(), RunState::Committing);
        handle.stop();
        resume_tx.send(()).unwrap();
        assert!(matches!(handle.wait().await, RunEvent::Completed("saved")));
    }

    #[tokio::test]
    async fn test_stop_after_index_saved() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        write_images(dir.path(), &[("a.jpg", "0.9"), ("b.jpg", "0.4")])?;
        let indexer = Indexer::new(dir.path(), Arc::new(ScoreExtractor));
        let output = indexer.output_path().to_path_buf();
        let cache = Arc::new(IndexCache::new());

        // 索引写入之后才到达的停止请求不会把结果变成取消
        let handle = spawn(move |cancel, progress| {
            let outcome = indexer.run(&cache, cancel, progress)?;
            cancel.cancel();
            Ok(match outcome {
                IndexOutcome::Completed(path) => Some(path),
                IndexOutcome::Cancelled => None,
            })
        });
        match handle.wait().await {
            RunEvent::Completed(path) => assert_eq!(path, output),
            other => panic!("unexpected {other:?}"),
        }
        assert!(output.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_before_commit_writes_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        write_images(dir.path(), &[("a.jpg", "0.9"), ("b.jpg", "0.4")])?;
        let indexer = Indexer::new(dir.path(), Arc::new(ScoreExtractor));
        let output = indexer.output_path().to_path_buf();
        let cache = Arc::new(IndexCache::new());

        let handle = spawn(move |cancel, progress| {
            let outcome = indexer.run(&cache, cancel, &mut |p| {
                progress(p);
                if p == 100 {
                    cancel.cancel();
                }
            })?;
            Ok(match outcome {
                IndexOutcome::Completed(path) => Some(path),
                IndexOutcome::Cancelled => None,
            })
        });
        assert!(matches!(handle.wait().await, RunEvent::Cancelled));
        assert!(!output.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_after_finish_is_ignored() {
        let mut handle = spawn(|_, _| Ok(Some(1)));
        assert!(matches!(handle.recv().await, Some(RunEvent::Completed(1))));
        handle.stop();
        handle.stop();
        assert_eq!(handle.state(), RunState::Completed);
        assert!(handle.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_runs_are_independent() {
        let (resume_tx, resume_rx) = mpsc::channel::<()>();
        let a = spawn(move |cancel, _| {
            resume_rx.recv().unwrap();
            Ok((!cancel.is_cancelled()).then_some("a"))
        });
        let b = spawn(|_, _| Ok(Some("b")));
        a.stop();
        resume_tx.send(()).unwrap();
        assert!(matches!(a.wait().await, RunEvent::Cancelled));
        assert!(matches!(b.wait().await, RunEvent::Completed("b")));
    }
}
