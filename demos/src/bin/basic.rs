use context_bridge::{Bridge, ThreadContext};
use scheduler::{SchedulerConfig, ThreadScheduler};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    let scheduler = match ThreadScheduler::start(SchedulerConfig::default().worker_threads(2)) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            tracing::error!(error = %e, "failed to start scheduler");
            return ExitCode::FAILURE;
        }
    };
    let bridge = Bridge::new(scheduler.clone(), "demo");
    let handle = bridge.launch(|co| async move {
        co.switch_to_main().await;
        tracing::info!(thread = ?thread::current().name(), "started on the main thread");

        //耗时操作放到线程池
        let sum = co.call_on_async(|| (1..=1_000_000u64).sum::<u64>()).await;
        tracing::info!(sum, "back on the main thread");

        co.switch_to_async().await;
        let name = co
            .call_on_main(|| thread::current().name().map(str::to_string))
            .await;
        tracing::info!(main = ?name, "called the main thread, still in the async pool");

        co.keep_thread(async {
            co.switch_to_main().await;
            co.wait_and_continue_in_same_thread(Duration::from_millis(250))
                .await;
            tracing::info!("waited five ticks on the main thread");
        })
        .await;
        if co.context() != ThreadContext::Async {
            tracing::warn!("context was not restored");
        }
        sum
    });
    let code = match handle.join() {
        Ok(sum) => {
            println!("Hello, world! {}", sum);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "coroutine failed");
            ExitCode::FAILURE
        }
    };
    scheduler.shutdown();
    code
}
