//! 服务级运行计数
//!
//! 显式注入的计数器对象（非模块级单例）：编排器是唯一写入方，
//! 快照读取随时可并发调用。f64 累计值按位存进 AtomicU64。

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// 跨循环的运行计数；进程级状态，仅随循环完成单调更新
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    scans: AtomicU64,
    opportunities: AtomicU64,
    generated: AtomicU64,
    applied: AtomicU64,
    rejected: AtomicU64,
    /// 累计质量增量（f64 位模式）
    quality_gain_bits: AtomicU64,
}

/// 一次快照读取（serde 友好）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub scans: u64,
    pub opportunities: u64,
    pub generated: u64,
    pub applied: u64,
    pub rejected: u64,
    pub total_quality_gain: f64,
    pub avg_quality_gain: f64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次扫描及其发现的机会数
    pub fn record_scan(&self, opportunities: u64) {
        self.scans.fetch_add(1, Ordering::Relaxed);
        self.opportunities.fetch_add(opportunities, Ordering::Relaxed);
    }

    /// 循环完成后一次性记录本循环的计数与已应用改进的权威增量之和
    pub fn record_cycle(&self, generated: u64, applied: u64, rejected: u64, quality_gain: f64) {
        self.generated.fetch_add(generated, Ordering::Relaxed);
        self.applied.fetch_add(applied, Ordering::Relaxed);
        self.rejected.fetch_add(rejected, Ordering::Relaxed);
        self.add_gain(quality_gain);
    }

    fn add_gain(&self, delta: f64) {
        if delta == 0.0 {
            return;
        }
        let mut current = self.quality_gain_bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self.quality_gain_bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// 纯读取快照，可与进行中的循环并发
    pub fn snapshot(&self) -> MetricsSnapshot {
        let applied = self.applied.load(Ordering::Relaxed);
        let total_gain = f64::from_bits(self.quality_gain_bits.load(Ordering::Relaxed));
        MetricsSnapshot {
            scans: self.scans.load(Ordering::Relaxed),
            opportunities: self.opportunities.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
            applied,
            rejected: self.rejected.load(Ordering::Relaxed),
            total_quality_gain: total_gain,
            avg_quality_gain: if applied > 0 {
                total_gain / applied as f64
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let m = ServiceMetrics::new();
        m.record_scan(3);
        m.record_cycle(2, 2, 1, 0.12);
        m.record_cycle(1, 0, 1, 0.0);

        let s = m.snapshot();
        assert_eq!(s.scans, 1);
        assert_eq!(s.opportunities, 3);
        assert_eq!(s.generated, 3);
        assert_eq!(s.applied, 2);
        assert_eq!(s.rejected, 2);
        assert!((s.total_quality_gain - 0.12).abs() < 1e-9);
        assert!((s.avg_quality_gain - 0.06).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_on_fresh_metrics() {
        let s = ServiceMetrics::new().snapshot();
        assert_eq!(s.applied, 0);
        assert_eq!(s.avg_quality_gain, 0.0);
    }
}
