use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// 轻量级任务标识生成器
///
/// 格式为 `<毫秒时间戳>-<主机编号>-<序号>`，每个任务管理器实例持有一个。
#[derive(Debug)]
pub struct LightweightIdentifierGenerator {
    host_number: u32,
    sequence: AtomicU64,
}

impl LightweightIdentifierGenerator {
    pub fn new(node_id: &str) -> Self {
        let host_number = node_id
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32))
            % 1000;
        Self {
            host_number,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn host_number(&self) -> u32 {
        self.host_number
    }

    pub fn generate(&self) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!(
            "{}-{}-{}",
            Utc::now().timestamp_millis(),
            self.host_number,
            sequence
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_identifiers_are_unique_and_well_formed() {
        let generator = LightweightIdentifierGenerator::new("node-a");
        let ids: HashSet<String> = (0..100).map(|_| generator.generate()).collect();
        assert_eq!(ids.len(), 100);

        for id in &ids {
            let parts: Vec<&str> = id.split('-').collect();
            assert_eq!(parts.len(), 3);
            assert_eq!(parts[1], generator.host_number().to_string());
        }
    }

    #[test]
    fn test_host_number_is_stable_per_node() {
        let a = LightweightIdentifierGenerator::new("node-a");
        let b = LightweightIdentifierGenerator::new("node-a");
        assert_eq!(a.host_number(), b.host_number());
        assert!(a.host_number() < 1000);
    }
}
