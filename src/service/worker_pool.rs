use crate::error::AppError;
use tokio::sync::oneshot;

/// 固定线程数的推理线程池
///
/// 解码、裁剪和模型调用都是阻塞操作, 交给这里执行, 异步线程只负责等待结果。
pub struct InferencePool {
    pool: rayon::ThreadPool,
}

impl InferencePool {
    pub fn new(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("inference-{}", i))
            .panic_handler(|_| tracing::error!("inference job panicked"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// 在线程池中执行阻塞任务; 调用方放弃等待不会中断正在执行的任务
    pub async fn run<F, R>(&self, job: F) -> Result<R, AppError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            let _ = tx.send(job());
        });
        rx.await
            .map_err(|_| AppError::Internal("inference worker dropped the job".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_returns_job_output() {
        let pool = InferencePool::new(2).unwrap();
        assert_eq!(pool.threads(), 2);
        let value = pool.run(|| 21 * 2).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_panicking_job_is_reported_as_internal_error() {
        let pool = InferencePool::new(1).unwrap();
        let result: Result<(), AppError> = pool.run(|| panic!("boom")).await;
        assert!(matches!(result, Err(AppError::Internal(_))));

        // the pool keeps serving after a panic
        assert_eq!(pool.run(|| "ok").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_zero_threads_is_bumped_to_one() {
        let pool = InferencePool::new(0).unwrap();
        assert_eq!(pool.threads(), 1);
    }
}
