use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread;

use tokio::sync::oneshot;
use tokio::sync::oneshot::Receiver;

/// A task running on the rayon pool panicked (or the pool dropped it).
#[derive(Debug, thiserror::Error)]
#[error("blocking task panicked: {message}")]
pub struct TaskPanicked {
    pub message: String,
}

impl TaskPanicked {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        TaskPanicked { message }
    }
}

/// Async handle for a blocking task running in a Rayon thread pool.
/// A panic inside the task resolves the handle to `Err` instead of unwinding
/// into the awaiting task.
pub struct AsyncRayonHandle<T> {
    pub(crate) rx: Receiver<thread::Result<T>>,
}

impl<T> Future for AsyncRayonHandle<T> {
    type Output = Result<T, TaskPanicked>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let rx = Pin::new(&mut self.rx);
        rx.poll(cx).map(|result| match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(TaskPanicked::from_payload(payload)),
            Err(_) => Err(TaskPanicked {
                message: "task dropped before completing".to_string(),
            }),
        })
    }
}

/// Asynchronous wrapper around Rayon's [`spawn`](rayon::spawn).
///
/// Runs a function on the global Rayon thread pool with LIFO priority,
/// producing a future that resolves with the function's return value.
pub fn spawn<F, R>(func: F) -> AsyncRayonHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = oneshot::channel();

    rayon::spawn(move || {
        let _result = tx.send(catch_unwind(AssertUnwindSafe(func)));
    });

    AsyncRayonHandle { rx }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_the_closure_value() {
        let v = vec![1, 2, 3];
        let sum = spawn(move || v.iter().sum::<i32>()).await.unwrap();
        assert_eq!(sum, 6);
    }

    #[tokio::test]
    async fn panic_becomes_an_error() {
        let err = spawn(|| -> i32 { panic!("boom") }).await.unwrap_err();
        assert_eq!(err.message, "boom");
    }
}
