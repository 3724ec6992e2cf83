//! 参考实现的宿主调度器：一个按tick推进的串行主线程，加一个工作窃取线程池。

mod config;
mod error;
mod pool;

pub use config::SchedulerConfig;
pub use error::SchedulerError;

use crate::pool::Pool;
use context_bridge::{HostScheduler, Job};
use id_generator::IdGenerator;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use timer::TimerList;

static GLOBAL: OnceCell<Arc<ThreadScheduler>> = OnceCell::new();

/// 执行单个任务，任务panic只记日志，不能带走调度线程
pub(crate) fn run_job(job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        tracing::error!(%message, "scheduled job panicked");
    }
}

#[derive(Debug)]
pub struct ThreadScheduler {
    id: usize,
    config: SchedulerConfig,
    main: Arc<MainLoop>,
    pool: Arc<Pool>,
    main_thread: ThreadId,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadScheduler {
    pub fn start(config: SchedulerConfig) -> Result<Arc<Self>, SchedulerError> {
        config.validate()?;
        let id = IdGenerator::next_id("scheduler");
        let name = format!("{}-{}", config.thread_name, id);
        let (pool, mut threads) = Pool::start(&name, config.worker_threads)?;
        let main = Arc::new(MainLoop::new(config.tick()));
        let spawned = {
            let main = main.clone();
            let pool = pool.clone();
            thread::Builder::new()
                .name(format!("{}-main", name))
                .spawn(move || main.run(&pool))
        };
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                pool.shutdown();
                for handle in threads {
                    let _ = handle.join();
                }
                return Err(e.into());
            }
        };
        let main_thread = handle.thread().id();
        threads.push(handle);
        tracing::info!(
            id,
            workers = config.worker_threads,
            tick_millis = config.tick_millis,
            "scheduler started"
        );
        Ok(Arc::new(ThreadScheduler {
            id,
            config,
            main,
            pool,
            main_thread,
            threads: Mutex::new(threads),
        }))
    }

    /// 进程级的默认调度器，第一次调用时启动
    pub fn global() -> Result<&'static Arc<ThreadScheduler>, SchedulerError> {
        GLOBAL.get_or_try_init(|| ThreadScheduler::start(SchedulerConfig::default()))
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// 主线程已经走过的tick数
    pub fn current_tick(&self) -> u64 {
        self.main.state.lock().tick
    }

    /// 停止所有线程，未执行的任务会被丢弃。可以重复调用。
    pub fn shutdown(&self) {
        let first = {
            let mut state = self.main.state.lock();
            let first = !state.shutdown;
            state.shutdown = true;
            self.main.signal.notify_all();
            first
        };
        self.pool.shutdown();
        let handles = std::mem::take(&mut *self.threads.lock());
        let current = thread::current().id();
        for handle in handles {
            //在调度器自己的线程上关闭时不能join自己
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!(id = self.id, "scheduler thread panicked");
            }
        }
        let discarded = self.pool.drain();
        if discarded > 0 {
            tracing::warn!(id = self.id, discarded, "async jobs discarded on shutdown");
        }
        if first {
            tracing::info!(id = self.id, "scheduler stopped");
        }
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl HostScheduler for ThreadScheduler {
    fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread
    }

    fn submit_main(&self, job: Job) {
        let mut state = self.main.state.lock();
        if state.shutdown {
            drop(state);
            tracing::warn!(id = self.id, "main job submitted after shutdown, discarded");
            return;
        }
        state.queue.push_back(job);
        self.main.signal.notify_one();
    }

    fn submit_async(&self, job: Job) {
        self.pool.push(job);
    }

    fn submit_main_delayed(&self, job: Job, ticks: u64) {
        let mut state = self.main.state.lock();
        if state.shutdown {
            drop(state);
            tracing::warn!(id = self.id, "delayed job submitted after shutdown, discarded");
            return;
        }
        let due = state.tick.saturating_add(ticks);
        state.delayed.insert(due, job);
    }

    fn submit_async_delayed(&self, job: Job, ticks: u64) {
        let mut state = self.main.state.lock();
        if state.shutdown {
            drop(state);
            tracing::warn!(id = self.id, "delayed job submitted after shutdown, discarded");
            return;
        }
        let due = state.tick.saturating_add(ticks);
        state.async_delayed.insert(due, job);
    }

    fn block_on_main(&self, job: Job) {
        if self.is_main_thread() {
            job();
            return;
        }
        let done = Arc::new(Done {
            finished: Mutex::new(false),
            signal: Condvar::new(),
        });
        let guard = DoneGuard(done.clone());
        self.submit_main(Box::new(move || {
            let _guard = guard;
            job();
        }));
        let mut finished = done.finished.lock();
        while !*finished {
            done.signal.wait(&mut finished);
        }
    }
}

struct Done {
    finished: Mutex<bool>,
    signal: Condvar,
}

/// 任务执行完或者被丢弃时都会唤醒等待者
struct DoneGuard(Arc<Done>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        *self.0.finished.lock() = true;
        self.0.signal.notify_all();
    }
}

#[derive(Debug)]
struct MainLoop {
    state: Mutex<MainState>,
    signal: Condvar,
    tick: Duration,
}

struct MainState {
    tick: u64,
    shutdown: bool,
    queue: VecDeque<Job>,
    delayed: TimerList<Job>,
    async_delayed: TimerList<Job>,
}

impl std::fmt::Debug for MainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainState")
            .field("tick", &self.tick)
            .field("shutdown", &self.shutdown)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl MainLoop {
    fn new(tick: Duration) -> Self {
        MainLoop {
            state: Mutex::new(MainState {
                tick: 0,
                shutdown: false,
                queue: VecDeque::new(),
                delayed: TimerList::new(),
                async_delayed: TimerList::new(),
            }),
            signal: Condvar::new(),
            tick,
        }
    }

    fn run(&self, pool: &Pool) {
        let mut next_tick = Instant::now() + self.tick;
        let mut state = self.state.lock();
        while !state.shutdown {
            //先推进时钟，主线程任务再多也不能饿死延时任务
            if Instant::now() >= next_tick {
                next_tick += self.tick;
                Self::advance(&mut state, pool);
                continue;
            }
            if let Some(job) = state.queue.pop_front() {
                MutexGuard::unlocked(&mut state, || run_job(job));
                continue;
            }
            self.signal.wait_until(&mut state, next_tick);
        }
        let mut discarded: Vec<Job> = state.queue.drain(..).collect();
        while let Some(entry) = state.delayed.pop_front() {
            discarded.extend(entry);
        }
        while let Some(entry) = state.async_delayed.pop_front() {
            discarded.extend(entry);
        }
        drop(state);
        if !discarded.is_empty() {
            tracing::warn!(discarded = discarded.len(), "main jobs discarded on shutdown");
        }
    }

    fn advance(state: &mut MainState, pool: &Pool) {
        state.tick += 1;
        let now = state.tick;
        while let Some(entry) = state.delayed.pop_due(now) {
            state.queue.extend(entry);
        }
        while let Some(entry) = state.async_delayed.pop_due(now) {
            for job in entry {
                pool.push(job);
            }
        }
    }
}
