use crate::task::{self, Suspension};
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// 协程恢复时带回的结果，`Err`是被捕获的panic
pub type Outcome<T> = std::thread::Result<T>;

struct Slot<T> {
    outcome: Mutex<Option<Outcome<T>>>,
}

/// 挂起点的恢复令牌。
///
/// 只能通过值调用[`resume`](Continuation::resume)等方法触发，所以不可能触发两次；
/// 谁调用触发方法，被挂起的协程就在谁的线程上继续执行。
pub struct Continuation<T> {
    slot: Arc<Slot<T>>,
    waker: Option<Waker>,
    suspension: Option<Suspension>,
}

impl<T> Continuation<T> {
    pub fn resume(self, value: T) {
        self.complete(Ok(value))
    }

    /// 在恢复点重新抛出panic
    pub fn resume_unwind(self, payload: Box<dyn Any + Send>) {
        self.complete(Err(payload))
    }

    pub fn complete(mut self, outcome: Outcome<T>) {
        *self.slot.outcome.lock() = Some(outcome);
        //先销账再唤醒，恢复后的下一个挂起点才能登记
        self.suspension.take();
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

impl<T> Drop for Continuation<T> {
    fn drop(&mut self) {
        if self.waker.is_some() {
            tracing::warn!("continuation dropped without being resumed, the coroutine can not go on");
        }
    }
}

/// 挂起当前协程，`dispatch`负责把令牌交给宿主调度的任务
pub(crate) fn suspend<T, F>(dispatch: F) -> Suspend<T, F>
where
    F: FnOnce(Continuation<T>),
{
    Suspend {
        dispatch: Some(dispatch),
        slot: None,
    }
}

pub(crate) struct Suspend<T, F> {
    dispatch: Option<F>,
    slot: Option<Arc<Slot<T>>>,
}

//不做pin投影
impl<T, F> Unpin for Suspend<T, F> {}

impl<T, F> Future for Suspend<T, F>
where
    F: FnOnce(Continuation<T>),
{
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        if let Some(dispatch) = this.dispatch.take() {
            let suspension = task::begin_suspension();
            let slot = Arc::new(Slot {
                outcome: Mutex::new(None),
            });
            this.slot = Some(slot.clone());
            dispatch(Continuation {
                slot,
                waker: Some(cx.waker().clone()),
                suspension,
            });
            //即使已经同步触发，也要等waker重新poll
            return Poll::Pending;
        }
        let outcome = match &this.slot {
            Some(slot) => slot.outcome.lock().take(),
            None => panic!("`Suspend` polled after completion"),
        };
        match outcome {
            Some(Ok(value)) => {
                this.slot = None;
                Poll::Ready(value)
            }
            Some(Err(payload)) => {
                this.slot = None;
                panic::resume_unwind(payload)
            }
            None => Poll::Pending,
        }
    }
}
