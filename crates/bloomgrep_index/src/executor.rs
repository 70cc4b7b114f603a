//! Параллельный исполнитель с семафором и кооперативной отменой.
//!
//! Fan-out/fan-in: каждая задача считает свой локальный результат, выходы
//! стекаются в один канал без общего мутабельного состояния. Порядок выходов
//! не гарантирован — упорядочивание делает вызывающая сторона в самом конце.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

pub struct ParallelExecutor {
    sem: Arc<Semaphore>,
}

impl ParallelExecutor {
    pub fn new(parallelism: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(parallelism.max(1))),
        }
    }

    /// Запускает задачу на каждый вход; степень параллелизма ограничена
    /// семафором. Отмена прекращает раздачу невзятых входов, уже идущие
    /// задачи дорабатывают до ближайшей своей проверки токена.
    ///
    /// Ошибка одной задачи изолируется: логируется и пропускается,
    /// остальные продолжают.
    pub async fn run_all<I, O, F, Fut>(
        &self,
        ct: CancellationToken,
        inputs: Vec<I>,
        task_fn: F,
    ) -> Vec<O>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: Fn(I, CancellationToken) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<O>();
        let mut spawned = 0usize;

        for input in inputs {
            if ct.is_cancelled() {
                break;
            }
            let sem = self.sem.clone();
            let tx = tx.clone();
            let ct = ct.clone();
            let task_fn = task_fn.clone();
            spawned += 1;
            tokio::spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return,
                };
                if ct.is_cancelled() {
                    return;
                }
                match task_fn(input, ct).await {
                    Ok(out) => {
                        let _ = tx.send(out);
                    }
                    Err(err) => tracing::warn!(error = %err, "worker task failed, skipped"),
                }
            });
        }
        drop(tx);

        let mut parts = Vec::with_capacity(spawned);
        while let Some(out) = rx.recv().await {
            parts.push(out);
        }
        parts
    }
}
