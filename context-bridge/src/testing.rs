use crate::{HostScheduler, Job, ThreadContext};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use timer::TimerList;

/// 单线程模拟的宿主调度器：主线程、线程池、tick时钟都由测试手动推进
pub(crate) struct ManualScheduler {
    queues: Mutex<Queues>,
    current: Mutex<ThreadContext>,
    submitted: AtomicUsize,
    executed: AtomicUsize,
}

#[derive(Default)]
struct Queues {
    tick: u64,
    main: VecDeque<Job>,
    asynchronous: VecDeque<Job>,
    main_delayed: TimerList<Job>,
    async_delayed: TimerList<Job>,
}

impl ManualScheduler {
    pub(crate) fn new(current: ThreadContext) -> Self {
        ManualScheduler {
            queues: Mutex::new(Queues::default()),
            current: Mutex::new(current),
            submitted: AtomicUsize::new(0),
            executed: AtomicUsize::new(0),
        }
    }

    pub(crate) fn tick(&self) -> u64 {
        self.queues.lock().tick
    }

    pub(crate) fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    pub(crate) fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    /// 一直执行到没有任务为止，返回执行的任务数
    pub(crate) fn run_until_idle(&self) -> usize {
        let mut count = 0;
        while let Some((context, job)) = self.next() {
            self.run_as(context, job);
            count += 1;
        }
        assert_eq!(
            self.submitted(),
            self.executed(),
            "every submitted job must run exactly once"
        );
        count
    }

    /// 丢弃所有待执行的任务
    pub(crate) fn discard_pending(&self) -> usize {
        let mut guard = self.queues.lock();
        let queues = &mut *guard;
        let mut jobs: Vec<Job> = queues
            .main
            .drain(..)
            .chain(queues.asynchronous.drain(..))
            .collect();
        while let Some(entry) = queues.main_delayed.pop_front() {
            jobs.extend(entry);
        }
        while let Some(entry) = queues.async_delayed.pop_front() {
            jobs.extend(entry);
        }
        drop(guard);
        let count = jobs.len();
        self.submitted.fetch_sub(count, Ordering::SeqCst);
        //锁外drop，令牌的drop可能会回调调度器
        drop(jobs);
        count
    }

    fn next(&self) -> Option<(ThreadContext, Job)> {
        let mut queues = self.queues.lock();
        loop {
            if let Some(job) = queues.main.pop_front() {
                return Some((ThreadContext::Main, job));
            }
            if let Some(job) = queues.asynchronous.pop_front() {
                return Some((ThreadContext::Async, job));
            }
            if queues.main_delayed.is_empty() && queues.async_delayed.is_empty() {
                return None;
            }
            let now = queues.tick;
            let mut released = false;
            while let Some(entry) = queues.main_delayed.pop_due(now) {
                queues.main.extend(entry);
                released = true;
            }
            while let Some(entry) = queues.async_delayed.pop_due(now) {
                queues.asynchronous.extend(entry);
                released = true;
            }
            if !released {
                queues.tick += 1;
            }
        }
    }

    fn run_as(&self, context: ThreadContext, job: Job) {
        let previous = std::mem::replace(&mut *self.current.lock(), context);
        job();
        *self.current.lock() = previous;
        self.executed.fetch_add(1, Ordering::SeqCst);
    }
}

impl HostScheduler for ManualScheduler {
    fn is_main_thread(&self) -> bool {
        *self.current.lock() == ThreadContext::Main
    }

    fn submit_main(&self, job: Job) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.queues.lock().main.push_back(job);
    }

    fn submit_async(&self, job: Job) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.queues.lock().asynchronous.push_back(job);
    }

    fn submit_main_delayed(&self, job: Job, ticks: u64) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        let mut queues = self.queues.lock();
        let due = queues.tick + ticks;
        queues.main_delayed.insert(due, job);
    }

    fn submit_async_delayed(&self, job: Job, ticks: u64) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        let mut queues = self.queues.lock();
        let due = queues.tick + ticks;
        queues.async_delayed.insert(due, job);
    }

    fn block_on_main(&self, job: Job) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.run_as(ThreadContext::Main, job);
    }
}
