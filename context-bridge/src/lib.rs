//! 在宿主调度器的"主线程"与"异步线程池"之间来回切换的挂起/恢复桥。
//!
//! 协程体写成一段顺序的`async`代码，每个[`Bridge`]操作都是一个挂起点：
//! 挂起时把[`Continuation`]交给宿主调度的任务，任务在哪个线程上触发令牌，
//! 协程就在哪个线程上继续往下执行，panic也沿同一条路径传回。

pub mod bridge;
pub mod continuation;
pub mod deferred;
mod task;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, CoroutineHandle};
pub use continuation::Continuation;
pub use deferred::{Deferred, JoinError};

/// 交给宿主调度器执行的任务
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// 当前代码所在的执行上下文，只能现场查询，不做缓存
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ThreadContext {
    /// 串行的主线程
    Main,
    /// 并行的异步线程池
    Async,
}

/// 宿主调度器需要提供的能力
pub trait HostScheduler: Send + Sync {
    /// 当前线程是否是主线程
    fn is_main_thread(&self) -> bool;

    /// 在主线程上执行，同一调度器提交的任务按提交顺序执行
    fn submit_main(&self, job: Job);

    /// 在线程池中执行，不保证顺序
    fn submit_async(&self, job: Job);

    /// 至少`ticks`个tick之后在主线程上执行
    fn submit_main_delayed(&self, job: Job, ticks: u64);

    /// 至少`ticks`个tick之后在线程池中执行
    fn submit_async_delayed(&self, job: Job, ticks: u64);

    /// 在主线程上执行并阻塞当前线程，直到`job`执行完毕(或被宿主丢弃)才返回
    fn block_on_main(&self, job: Job);
}
