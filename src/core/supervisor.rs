//! 宿主控制：Pause / Resume / Stop
//!
//! 协调器只在步边界检查信号，不打断飞行中的工具调用。Stop 基于
//! CancellationToken，一旦触发不可逆；Pause/Resume 为可往复的标志位。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// 控制句柄：克隆后宿主与协调器各持一份
#[derive(Clone, Default)]
pub struct Supervisor {
    paused: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// 停止执行；不可逆
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_resume_roundtrip() {
        let s = Supervisor::new();
        assert!(!s.is_paused());
        s.pause();
        assert!(s.is_paused());
        s.resume();
        assert!(!s.is_paused());
    }

    #[test]
    fn test_stop_is_visible_to_clones() {
        let s = Supervisor::new();
        let other = s.clone();
        s.stop();
        assert!(other.is_stopped());
    }
}
