mod compare;
mod extractors;
mod index;
mod info;
mod list;
mod search;

pub use compare::*;
pub use extractors::*;
pub use index::*;
pub use info::*;
pub use list::*;
pub use search::*;

use anyhow::bail;
use indicatif::ProgressBar;
use log::debug;

use crate::config::Opts;
use crate::utils::pb_style;
use crate::worker::{RunEvent, RunHandle};

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 显示任务进度直到结束，Ctrl-C 请求停止任务
///
/// 任务被取消时返回 `Ok(None)`，失败时返回错误
async fn drive<T>(handle: RunHandle<T>, message: &'static str) -> anyhow::Result<Option<T>> {
    let pb = ProgressBar::new(100).with_style(pb_style()).with_message(message);
    drive_with(handle, &pb).await
}

/// 无论任务以何种方式结束都会清除进度条，结束提示由调用方输出
async fn drive_with<T>(handle: RunHandle<T>, pb: &ProgressBar) -> anyhow::Result<Option<T>> {
    let result = follow(handle, pb).await;
    pb.finish_and_clear();
    result
}

async fn follow<T>(mut handle: RunHandle<T>, pb: &ProgressBar) -> anyhow::Result<Option<T>> {
    let mut stopping = false;
    loop {
        let event = tokio::select! {
            event = handle.recv() => event,
            _ = tokio::signal::ctrl_c(), if !stopping => {
                pb.set_message("正在停止");
                handle.stop();
                stopping = true;
                continue;
            }
        };
        match event {
            Some(RunEvent::Progress(p)) => pb.set_position(p as u64),
            Some(RunEvent::Completed(value)) => return Ok(Some(value)),
            Some(RunEvent::Failed(reason)) => bail!(reason),
            Some(RunEvent::Cancelled) => {
                debug!("任务已取消");
                return Ok(None);
            }
            None => bail!("任务异常退出"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::worker::spawn;

    fn hidden() -> ProgressBar {
        ProgressBar::hidden().with_message("working")
    }

    #[tokio::test]
    async fn test_drive_clears_on_completed() -> anyhow::Result<()> {
        let pb = hidden();
        let value = drive_with(spawn(|_, progress| {
            progress(50);
            Ok(Some(7))
        }), &pb)
        .await?;
        assert_eq!(value, Some(7));
        assert!(pb.is_finished());
        Ok(())
    }

    #[tokio::test]
    async fn test_drive_clears_on_failed() {
        let pb = hidden();
        let result = drive_with(spawn::<(), _>(|_, _| Err(EngineError::UnknownExtractor("x".into()))), &pb).await;
        assert!(result.is_err());
        assert!(pb.is_finished());
        assert_eq!(pb.message(), "working");
    }

    #[tokio::test]
    async fn test_drive_clears_on_cancelled() -> anyhow::Result<()> {
        let pb = hidden();
        let handle = spawn::<(), _>(|cancel, _| {
            cancel.cancel();
            Ok(None)
        });
        assert_eq!(drive_with(handle, &pb).await?, None);
        assert!(pb.is_finished());
        // 进度条不附带取消提示，提示只由调用方输出一次
        assert_eq!(pb.message(), "working");
        Ok(())
    }
}
