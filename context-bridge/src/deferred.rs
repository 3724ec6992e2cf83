use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// 协程体panic，且没有被捕获
    #[error("coroutine panicked: {0}")]
    Panicked(String),
    /// 还没执行完，恢复令牌就被宿主丢弃了
    #[error("coroutine was abandoned before completion")]
    Abandoned,
}

impl JoinError {
    pub(crate) fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        JoinError::Panicked(message)
    }
}

struct Shared<T> {
    result: Mutex<Option<Result<T, JoinError>>>,
    completed: Condvar,
}

/// 协程的结果，只会被写入一次
pub struct Deferred<T> {
    shared: Arc<Shared<T>>,
}

pub(crate) struct Completer<T> {
    shared: Option<Arc<Shared<T>>>,
}

pub(crate) fn channel<T>() -> (Completer<T>, Deferred<T>) {
    let shared = Arc::new(Shared {
        result: Mutex::new(None),
        completed: Condvar::new(),
    });
    (
        Completer {
            shared: Some(shared.clone()),
        },
        Deferred { shared },
    )
}

impl<T> Completer<T> {
    pub(crate) fn complete(mut self, result: Result<T, JoinError>) {
        if let Some(shared) = self.shared.take() {
            Self::publish(&shared, result);
        }
    }

    fn publish(shared: &Shared<T>, result: Result<T, JoinError>) {
        *shared.result.lock() = Some(result);
        shared.completed.notify_all();
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            Self::publish(&shared, Err(JoinError::Abandoned));
        }
    }
}

impl<T> Deferred<T> {
    pub fn is_completed(&self) -> bool {
        self.shared.result.lock().is_some()
    }

    /// 已完成则取出结果，否则原样返回
    pub fn try_join(self) -> Result<Result<T, JoinError>, Self> {
        let taken = self.shared.result.lock().take();
        match taken {
            Some(result) => Ok(result),
            None => Err(self),
        }
    }

    /// 阻塞直到协程结束。
    ///
    /// 不要在协程需要的主线程上调用，否则会死锁。
    pub fn join(self) -> Result<T, JoinError> {
        let mut result = self.shared.result.lock();
        loop {
            if let Some(result) = result.take() {
                return result;
            }
            self.shared.completed.wait(&mut result);
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("completed", &self.is_completed())
            .finish()
    }
}
