use crate::continuation::{suspend, Continuation};
use crate::deferred::{self, Deferred, JoinError};
use crate::task::{self, Task};
use crate::{HostScheduler, ThreadContext};
use futures::FutureExt;
use id_generator::IdGenerator;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// 绑定了宿主调度器和所属者的切换能力，可以随意clone。
///
/// 所有`async`方法都是挂起点，只能在[`Bridge::launch`]启动的协程里`.await`，
/// 否则"在触发令牌的线程上恢复"这一点无法保证。
///
/// 同一个协程里的挂起点必须逐个`.await`。用`join!`/`select!`同时等待两个挂起点时，
/// 第二个挂起点会panic，协程以[`JoinError::Panicked`]结束。
#[derive(Clone)]
pub struct Bridge {
    scheduler: Arc<dyn HostScheduler>,
    owner: Arc<str>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge").field("owner", &self.owner).finish()
    }
}

impl Bridge {
    pub fn new(scheduler: Arc<dyn HostScheduler>, owner: impl Into<Arc<str>>) -> Self {
        Bridge {
            scheduler,
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn scheduler(&self) -> &Arc<dyn HostScheduler> {
        &self.scheduler
    }

    pub fn is_main_thread(&self) -> bool {
        self.scheduler.is_main_thread()
    }

    /// 现场查询当前上下文
    pub fn context(&self) -> ThreadContext {
        if self.scheduler.is_main_thread() {
            ThreadContext::Main
        } else {
            ThreadContext::Async
        }
    }

    /// 启动一个协程，第一段代码在当前线程上同步执行，直到第一个真正的挂起点
    pub fn launch<F, Fut, T>(&self, body: F) -> CoroutineHandle<T>
    where
        F: FnOnce(Bridge) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = IdGenerator::next_id("coroutine");
        let (completer, deferred) = deferred::channel();
        let body = AssertUnwindSafe(body(self.clone())).catch_unwind();
        let owner = self.owner.clone();
        let root = async move {
            match body.await {
                Ok(value) => completer.complete(Ok(value)),
                Err(payload) => {
                    let error = JoinError::panicked(payload);
                    tracing::warn!(owner = %owner, id, %error, "coroutine failed");
                    completer.complete(Err(error));
                }
            }
        };
        tracing::debug!(owner = %self.owner, id, "launching coroutine");
        Task::spawn(id, root.boxed());
        CoroutineHandle {
            id,
            bridge: self.clone(),
            deferred,
        }
    }

    /// 切换到线程池，已经在线程池中则直接返回
    pub async fn switch_to_async(&self) {
        if !self.scheduler.is_main_thread() {
            tracing::trace!("already off the main thread");
            return;
        }
        let scheduler = self.scheduler.clone();
        suspend(move |cont: Continuation<()>| {
            tracing::debug!("dispatching to the async pool");
            scheduler.submit_async(Box::new(move || cont.resume(())));
        })
        .await
    }

    /// 切换到主线程。
    ///
    /// 即使已经在主线程上也会经过调度器排队，保证排在之前提交到主线程的任务之后。
    pub async fn switch_to_main(&self) {
        self.dispatch_to_main().await
    }

    /// 切换到主线程，已经在主线程上则直接返回
    pub async fn switch_to_main_if_needed(&self) {
        if self.scheduler.is_main_thread() {
            tracing::trace!("already on the main thread");
            return;
        }
        self.dispatch_to_main().await
    }

    async fn dispatch_to_main(&self) {
        let scheduler = self.scheduler.clone();
        suspend(move |cont: Continuation<()>| {
            tracing::debug!("dispatching to the main thread");
            scheduler.submit_main(Box::new(move || cont.resume(())));
        })
        .await
    }

    /// 等待`ticks`个tick后在原来的上下文中继续。`ticks`为0也会经过调度器。
    pub async fn wait_ticks_and_continue_in_same_thread(&self, ticks: u64) {
        let scheduler = self.scheduler.clone();
        match self.context() {
            ThreadContext::Main => {
                suspend(move |cont: Continuation<()>| {
                    tracing::debug!(ticks, "waiting on the main thread");
                    scheduler.submit_main_delayed(Box::new(move || cont.resume(())), ticks);
                })
                .await
            }
            ThreadContext::Async => {
                suspend(move |cont: Continuation<()>| {
                    tracing::debug!(ticks, "waiting in the async pool");
                    scheduler.submit_async_delayed(Box::new(move || cont.resume(())), ticks);
                })
                .await
            }
        }
    }

    /// 按tick向下取整后等待，不足一个tick的部分会被丢弃
    pub async fn wait_and_continue_in_same_thread(&self, duration: Duration) {
        self.wait_ticks_and_continue_in_same_thread(timer::ticks_of(duration))
            .await
    }

    /// 在主线程上执行`callable`并返回它的结果，调用者的上下文不变。
    ///
    /// 已经在主线程上则直接调用；否则阻塞当前线程直到主线程执行完毕，
    /// `callable`中的panic会在这里重新抛出。
    pub async fn call_on_main<F, R>(&self, callable: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.scheduler.is_main_thread() {
            return callable();
        }
        let slot = Arc::new(Mutex::new(None));
        let result = slot.clone();
        tracing::debug!("blocking on the main thread");
        let suspension = task::begin_suspension();
        self.scheduler.block_on_main(Box::new(move || {
            *result.lock() = Some(panic::catch_unwind(AssertUnwindSafe(callable)));
        }));
        drop(suspension);
        let outcome = slot.lock().take();
        match outcome {
            Some(Ok(value)) => value,
            Some(Err(payload)) => panic::resume_unwind(payload),
            None => panic!("host scheduler returned from `block_on_main` without running the job"),
        }
    }

    /// 在线程池中执行`callable`，结果(或panic)再经主线程交回，
    /// 所以无论从哪里调用，返回后都在主线程上。
    pub async fn call_on_async<F, R>(&self, callable: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let scheduler = self.scheduler.clone();
        suspend(move |cont: Continuation<R>| {
            tracing::debug!("dispatching callable to the async pool");
            let main = scheduler.clone();
            scheduler.submit_async(Box::new(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(callable));
                main.submit_main(Box::new(move || cont.complete(outcome)));
            }));
        })
        .await
    }

    /// 执行`block`，无论正常返回还是panic，退出时都切回进入时的上下文
    pub async fn keep_thread<Fut>(&self, block: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        let entry = self.context();
        let outcome = AssertUnwindSafe(block).catch_unwind().await;
        match entry {
            ThreadContext::Main => self.switch_to_main().await,
            ThreadContext::Async => self.switch_to_async().await,
        }
        match outcome {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

/// 一次后台操作：启动它的[`Bridge`]加上它的结果
pub struct CoroutineHandle<T> {
    id: usize,
    bridge: Bridge,
    deferred: Deferred<T>,
}

impl<T> CoroutineHandle<T> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn is_completed(&self) -> bool {
        self.deferred.is_completed()
    }

    /// 阻塞直到协程结束，不要在主线程上调用
    pub fn join(self) -> Result<T, JoinError> {
        self.deferred.join()
    }

    pub fn try_join(self) -> Result<Result<T, JoinError>, Self> {
        let CoroutineHandle {
            id,
            bridge,
            deferred,
        } = self;
        deferred.try_join().map_err(|deferred| CoroutineHandle {
            id,
            bridge,
            deferred,
        })
    }

    pub fn into_deferred(self) -> Deferred<T> {
        self.deferred
    }
}

impl<T> fmt::Debug for CoroutineHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoroutineHandle")
            .field("id", &self.id)
            .field("owner", &self.bridge.owner)
            .field("deferred", &self.deferred)
            .finish()
    }
}
