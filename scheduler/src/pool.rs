use crate::{run_job, SchedulerError};
use context_bridge::Job;
use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::iter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 工作窃取线程池，全局任务先进入injector，空闲线程再从别的线程那里偷
pub(crate) struct Pool {
    injector: Injector<Job>,
    stealers: Vec<Stealer<Job>>,
    //正在休眠的线程数
    idle: Mutex<usize>,
    signal: Condvar,
    shutdown: AtomicBool,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("workers", &self.stealers.len())
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

impl Pool {
    pub(crate) fn start(
        name: &str,
        size: usize,
    ) -> Result<(Arc<Pool>, Vec<JoinHandle<()>>), SchedulerError> {
        let workers: Vec<Worker<Job>> = (0..size).map(|_| Worker::new_fifo()).collect();
        let pool = Arc::new(Pool {
            injector: Injector::new(),
            stealers: workers.iter().map(Worker::stealer).collect(),
            idle: Mutex::new(0),
            signal: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let mut handles = Vec::with_capacity(size);
        for (index, local) in workers.into_iter().enumerate() {
            let worker = pool.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-worker-{}", name, index))
                .spawn(move || worker.run(local));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    pool.shutdown();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(e.into());
                }
            }
        }
        Ok((pool, handles))
    }

    pub(crate) fn push(&self, job: Job) {
        if self.shutdown.load(Ordering::SeqCst) {
            tracing::warn!("async job submitted after shutdown, discarded");
            return;
        }
        self.injector.push(job);
        //与shutdown竞争时，可能已经没有线程来取这个任务了
        if self.shutdown.load(Ordering::SeqCst) {
            let discarded = self.drain();
            if discarded > 0 {
                tracing::warn!(discarded, "async job raced with shutdown, discarded");
            }
            return;
        }
        let _idle = self.idle.lock();
        self.signal.notify_one();
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _idle = self.idle.lock();
        self.signal.notify_all();
    }

    /// 丢弃injector中剩余的任务，返回丢弃的个数
    pub(crate) fn drain(&self) -> usize {
        let mut count = 0;
        loop {
            match self.injector.steal() {
                Steal::Success(job) => {
                    drop(job);
                    count += 1;
                }
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
        count
    }

    fn run(&self, local: Worker<Job>) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            if let Some(job) = self.find(&local) {
                run_job(job);
                continue;
            }
            let mut idle = self.idle.lock();
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            if !self.injector.is_empty() {
                continue;
            }
            *idle += 1;
            //别的线程本地队列里的任务不会通知，定期醒来偷一次
            self.signal.wait_for(&mut idle, timer::TICK);
            *idle -= 1;
        }
        if !local.is_empty() {
            tracing::warn!(pending = local.len(), "worker stopped with pending jobs, discarded");
        }
    }

    fn find(&self, local: &Worker<Job>) -> Option<Job> {
        local.pop().or_else(|| {
            iter::repeat_with(|| {
                self.injector
                    .steal_batch_and_pop(local)
                    .or_else(|| self.stealers.iter().map(Stealer::steal).collect())
            })
            .find(|steal| !steal.is_retry())
            .and_then(Steal::success)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Pool;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn jobs_run_on_workers() {
        let (pool, handles) = Pool::start("pool-test", 2).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            pool.push(Box::new(move || tx.send(i).unwrap()));
        }
        let mut seen: Vec<i32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort();
        assert_eq!((0..10).collect::<Vec<_>>(), seen);
        pool.shutdown();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn push_after_shutdown_is_discarded() {
        let (pool, handles) = Pool::start("pool-test", 1).unwrap();
        pool.shutdown();
        for handle in handles {
            handle.join().unwrap();
        }
        let marker = Arc::new(());
        let held = marker.clone();
        pool.push(Box::new(move || drop(held)));
        assert_eq!(1, Arc::strong_count(&marker));
        assert_eq!(0, pool.drain());
    }

    #[test]
    fn push_racing_shutdown_never_strands_jobs() {
        let (pool, handles) = Pool::start("pool-test", 2).unwrap();
        let marker = Arc::new(());
        let ran = Arc::new(AtomicUsize::new(0));
        let pushers: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                let marker = marker.clone();
                let ran = ran.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let held = marker.clone();
                        let ran = ran.clone();
                        pool.push(Box::new(move || {
                            ran.fetch_add(1, Ordering::SeqCst);
                            drop(held);
                        }));
                    }
                })
            })
            .collect();
        pool.shutdown();
        for handle in handles {
            handle.join().unwrap();
        }
        pool.drain();
        for pusher in pushers {
            pusher.join().unwrap();
        }
        //关闭之后injector里不能再留下任务
        assert_eq!(0, pool.drain());
        assert_eq!(1, Arc::strong_count(&marker));
        assert!(ran.load(Ordering::SeqCst) <= 4000);
    }
}
