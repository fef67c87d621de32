use std::sync::Mutex;
use std::sync::PoisonError;

use chrono::{Duration, Utc};
use domain::Timestamp;

/// 本地创建内容时使用的时间源，写入的值充当存储端时间戳
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// 每次读取都前进固定步长的时钟，保证创建时间严格递增（用于测试和演示）
#[derive(Debug)]
pub struct SteppingClock {
    next: Mutex<Timestamp>,
    step: Duration,
}

impl SteppingClock {
    pub fn new(start: Timestamp, step: Duration) -> Self {
        Self {
            next: Mutex::new(start),
            step,
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> Timestamp {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        let now = *next;
        *next = now + self.step;
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stepping_clock_is_strictly_increasing() {
        let start = Utc.timestamp_millis_opt(1_000).unwrap();
        let clock = SteppingClock::new(start, Duration::milliseconds(10));
        assert_eq!(clock.now(), start);
        assert_eq!(clock.now().timestamp_millis(), 1_010);
        assert!(clock.now() > start);
    }
}
