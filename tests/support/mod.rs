#![allow(dead_code)]

use std::time::Duration;

use marketsync::application::queue::ContractCallQueue;
use marketsync::domain::{ContractCallJob, JobId};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Upper bound for anything a test waits on.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Dispatcher running on its own task; dropping the sender stops it.
pub struct RunningQueue {
    pub queue: ContractCallQueue,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<marketsync::Result<()>>,
}

impl RunningQueue {
    pub fn start(queue: ContractCallQueue) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(queue.clone().run(rx));
        Self {
            queue,
            shutdown,
            handle,
        }
    }

    pub async fn wait(&self, id: &JobId) -> ContractCallJob {
        tokio::time::timeout(TEST_TIMEOUT, self.queue.wait(id))
            .await
            .expect("job did not finish in time")
            .expect("job known to the queue")
    }

    /// Wait until every job has finished its bookkeeping. `wait` resolves as
    /// soon as a job turns terminal, before it is persisted and announced.
    pub async fn drain(&self) {
        tokio::time::timeout(TEST_TIMEOUT, async {
            while self.queue.depth() > 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("queue did not drain in time");
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        self.handle.await.expect("dispatcher task").expect("dispatcher result");
    }
}
