use std::collections::VecDeque;
use std::time::Duration;

/// 宿主调度器每秒的tick数
pub const TICKS_PER_SECOND: u64 = 20;

/// 一个tick的时长
pub const TICK: Duration = Duration::from_millis(1000 / TICKS_PER_SECOND);

const MILLIS_PER_SEC: u128 = 1_000;

/// 将时长换算为tick数，向下取整，不足一个tick的部分直接丢弃
#[inline]
pub fn ticks_of(dur: Duration) -> u64 {
    let ticks = dur.as_millis() * u128::from(TICKS_PER_SECOND) / MILLIS_PER_SEC;
    u64::try_from(ticks).unwrap_or(u64::MAX)
}

/// tick数对应的时长
#[inline]
pub fn duration_of(ticks: u64) -> Duration {
    TICK.saturating_mul(u32::try_from(ticks).unwrap_or(u32::MAX))
}

#[derive(Debug)]
pub struct TimerEntry<T> {
    tick: u64,
    dequeue: VecDeque<T>,
}

impl<T> TimerEntry<T> {
    pub fn new(tick: u64) -> Self {
        TimerEntry {
            tick,
            dequeue: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.dequeue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dequeue.is_empty()
    }

    /// 到期的tick
    pub fn get_tick(&self) -> u64 {
        self.tick
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.dequeue.pop_front()
    }

    pub fn push_back(&mut self, t: T) {
        self.dequeue.push_back(t)
    }
}

impl<T> IntoIterator for TimerEntry<T> {
    type Item = T;
    type IntoIter = std::collections::vec_deque::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.dequeue.into_iter()
    }
}

/// 按到期tick排序的延时队列，同一个tick内先进先出
#[derive(Debug)]
pub struct TimerList<T> {
    dequeue: VecDeque<TimerEntry<T>>,
}

impl<T> Default for TimerList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerList<T> {
    pub fn new() -> Self {
        TimerList {
            dequeue: VecDeque::new(),
        }
    }

    /// entry的个数，不是元素的个数
    pub fn len(&self) -> usize {
        self.dequeue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dequeue.is_empty()
    }

    pub fn insert(&mut self, tick: u64, t: T) {
        match self.dequeue.binary_search_by(|x| x.tick.cmp(&tick)) {
            Ok(index) => self.dequeue[index].push_back(t),
            Err(index) => {
                let mut entry = TimerEntry::new(tick);
                entry.push_back(t);
                self.dequeue.insert(index, entry);
            }
        }
    }

    pub fn front(&self) -> Option<&TimerEntry<T>> {
        self.dequeue.front()
    }

    pub fn pop_front(&mut self) -> Option<TimerEntry<T>> {
        self.dequeue.pop_front()
    }

    /// 弹出最早一个已到期(tick <= now)的entry
    pub fn pop_due(&mut self, now: u64) -> Option<TimerEntry<T>> {
        match self.dequeue.front() {
            Some(entry) if entry.tick <= now => self.dequeue.pop_front(),
            _ => None,
        }
    }
}
