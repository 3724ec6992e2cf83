use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 按key分配的自增id，每个key从1开始
pub struct IdGenerator {}

static ID_MAP: Lazy<RwLock<HashMap<&'static str, AtomicUsize>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

impl IdGenerator {
    pub fn next_id(key: &'static str) -> usize {
        //绝大多数情况下key已存在，读锁即可
        if let Some(id) = ID_MAP.read().get(key) {
            return id.fetch_add(1, Ordering::SeqCst);
        }
        ID_MAP
            .write()
            .entry(key)
            .or_insert_with(|| AtomicUsize::new(1))
            .fetch_add(1, Ordering::SeqCst)
    }
}
