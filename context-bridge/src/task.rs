use futures::future::BoxFuture;
use futures::task::{waker_ref, ArcWake};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Context;
use std::thread::{self, ThreadId};

pub(crate) const CONCURRENT_SUSPENSION: &str =
    "suspension points of one coroutine must be awaited one at a time";

thread_local! {
    //当前线程正在poll的任务的挂起计数
    static SUSPENDED: RefCell<Option<Arc<AtomicUsize>>> = const { RefCell::new(None) };
}

/// 一个尚未恢复的挂起点，drop时计数减一
pub(crate) struct Suspension(Arc<AtomicUsize>);

impl Drop for Suspension {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 登记一个挂起点。同一个协程已有挂起点未恢复时直接panic：
/// 两个令牌同时在外，其中一个在别的线程触发时会卡在poll锁上。
pub(crate) fn begin_suspension() -> Option<Suspension> {
    let pending = SUSPENDED.with(|current| current.borrow().clone())?;
    if pending.fetch_add(1, Ordering::SeqCst) > 0 {
        pending.fetch_sub(1, Ordering::SeqCst);
        panic!("{}", CONCURRENT_SUSPENSION);
    }
    Some(Suspension(pending))
}

/// poll期间把任务的挂起计数挂到当前线程上，嵌套poll时恢复外层
struct Polling(Option<Arc<AtomicUsize>>);

impl Polling {
    fn enter(pending: Arc<AtomicUsize>) -> Self {
        Polling(SUSPENDED.with(|current| current.borrow_mut().replace(pending)))
    }
}

impl Drop for Polling {
    fn drop(&mut self) {
        let previous = self.0.take();
        SUSPENDED.with(|current| *current.borrow_mut() = previous);
    }
}

/// 驱动一个协程体的任务，它自己就是waker。
///
/// 被唤醒时直接在唤醒者的线程上poll，这样协程总是在触发令牌的那个线程上恢复。
pub(crate) struct Task {
    id: usize,
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    //正在poll的线程
    poller: Mutex<Option<ThreadId>>,
    //poll过程中被同一线程唤醒
    notified: AtomicBool,
    //未恢复的挂起点个数，最多为1
    suspended: Arc<AtomicUsize>,
}

impl Task {
    /// 在当前线程上完成第一次poll
    pub(crate) fn spawn(id: usize, future: BoxFuture<'static, ()>) {
        let task = Arc::new(Task {
            id,
            future: Mutex::new(Some(future)),
            poller: Mutex::new(None),
            notified: AtomicBool::new(false),
            suspended: Arc::new(AtomicUsize::new(0)),
        });
        task.run();
    }

    fn run(self: &Arc<Self>) {
        let _span = tracing::trace_span!("coroutine", id = self.id).entered();
        //别的线程还在poll时，在这里等它挂起
        let mut future = self.future.lock();
        *self.poller.lock() = Some(thread::current().id());
        let waker = waker_ref(self);
        let mut cx = Context::from_waker(&waker);
        let polling = Polling::enter(self.suspended.clone());
        loop {
            let Some(body) = future.as_mut() else {
                break;
            };
            self.notified.store(false, Ordering::SeqCst);
            if body.as_mut().poll(&mut cx).is_ready() {
                tracing::trace!("coroutine finished");
                *future = None;
                break;
            }
            if !self.notified.swap(false, Ordering::SeqCst) {
                break;
            }
        }
        drop(polling);
        *self.poller.lock() = None;
    }
}

impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if *arc_self.poller.lock() == Some(thread::current().id()) {
            arc_self.notified.store(true, Ordering::SeqCst);
            return;
        }
        arc_self.run();
    }
}

#[cfg(test)]
mod tests {
    use crate::continuation::suspend;
    use crate::task::Task;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use std::sync::{mpsc, Arc};
    use std::thread;

    #[test]
    fn resumes_on_firing_thread() {
        let (tx, rx) = mpsc::channel();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let record = observed.clone();
        Task::spawn(
            1,
            async move {
                record.lock().push(thread::current().id());
                suspend(move |cont| tx.send(cont).unwrap()).await;
                record.lock().push(thread::current().id());
            }
            .boxed(),
        );
        let firing = thread::spawn(move || {
            let cont: crate::Continuation<()> = rx.recv().unwrap();
            cont.resume(());
            thread::current().id()
        });
        let firing_id = firing.join().unwrap();
        let observed = observed.lock();
        assert_eq!(2, observed.len());
        assert_eq!(thread::current().id(), observed[0]);
        assert_eq!(firing_id, observed[1]);
    }

    #[test]
    fn synchronous_resume_stays_on_thread() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let record = observed.clone();
        Task::spawn(
            2,
            async move {
                for i in 0..3 {
                    let value = suspend(move |cont| cont.resume(i)).await;
                    record.lock().push((value, thread::current().id()));
                }
            }
            .boxed(),
        );
        let observed = observed.lock();
        assert_eq!(3, observed.len());
        for (i, (value, id)) in observed.iter().enumerate() {
            assert_eq!(i, *value);
            assert_eq!(thread::current().id(), *id);
        }
    }

    #[test]
    fn dropped_task_releases_future() {
        let (tx, rx) = mpsc::channel::<crate::Continuation<()>>();
        let marker = Arc::new(());
        let held = marker.clone();
        Task::spawn(
            3,
            async move {
                let _held = held;
                suspend(move |cont| tx.send(cont).unwrap()).await;
            }
            .boxed(),
        );
        assert_eq!(2, Arc::strong_count(&marker));
        drop(rx.recv().unwrap());
        assert_eq!(1, Arc::strong_count(&marker));
    }
}
