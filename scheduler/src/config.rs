use crate::SchedulerError;
use serde::Deserialize;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 线程池大小
    pub worker_threads: usize,
    /// 一个tick的毫秒数
    pub tick_millis: u64,
    /// 线程名前缀
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            worker_threads: thread::available_parallelism().map_or(4, |n| n.get()),
            tick_millis: timer::TICK.as_millis() as u64,
            thread_name: "bridge".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn tick_millis(mut self, tick_millis: u64) -> Self {
        self.tick_millis = tick_millis;
        self
    }

    pub fn thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub(crate) fn validate(&self) -> Result<(), SchedulerError> {
        if self.worker_threads == 0 {
            return Err(SchedulerError::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.tick_millis == 0 {
            return Err(SchedulerError::InvalidConfig(
                "tick_millis must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{SchedulerConfig, SchedulerError};

    #[test]
    fn default() {
        let config = SchedulerConfig::default();
        assert!(config.worker_threads > 0);
        assert_eq!(50, config.tick_millis);
        assert_eq!("bridge", config.thread_name);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_partial() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{ "worker_threads": 2, "thread_name": "plugin" }"#).unwrap();
        assert_eq!(
            SchedulerConfig::default().worker_threads(2).thread_name("plugin"),
            config
        );
    }

    #[test]
    fn invalid() {
        let config = SchedulerConfig::default().worker_threads(0);
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));
        let config = SchedulerConfig::default().tick_millis(0);
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }
}
