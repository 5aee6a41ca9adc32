//! 层级化的操作结果
//!
//! 每个公开操作都会在调用方传入的结果下创建子结果，记录状态、消息和参数，
//! 最终由 `compute_status` 从子结果汇总出自身状态。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OperationResultStatus {
    #[serde(rename = "UNKNOWN")]
    Unknown,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "PARTIAL_ERROR")]
    PartialError,
    #[serde(rename = "FATAL_ERROR")]
    FatalError,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "NOT_APPLICABLE")]
    NotApplicable,
}

impl OperationResultStatus {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            OperationResultStatus::PartialError | OperationResultStatus::FatalError
        )
    }
}

impl fmt::Display for OperationResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationResultStatus::Unknown => "UNKNOWN",
            OperationResultStatus::Success => "SUCCESS",
            OperationResultStatus::Warning => "WARNING",
            OperationResultStatus::PartialError => "PARTIAL_ERROR",
            OperationResultStatus::FatalError => "FATAL_ERROR",
            OperationResultStatus::InProgress => "IN_PROGRESS",
            OperationResultStatus::NotApplicable => "NOT_APPLICABLE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationResult {
    pub operation: String,
    pub status: OperationResultStatus,
    pub message: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub subresults: Vec<OperationResult>,
}

impl OperationResult {
    pub fn new<S: Into<String>>(operation: S) -> Self {
        Self {
            operation: operation.into(),
            status: OperationResultStatus::Unknown,
            message: None,
            params: BTreeMap::new(),
            subresults: Vec::new(),
        }
    }

    /// 创建子结果并返回其可变引用
    pub fn create_subresult<S: Into<String>>(&mut self, operation: S) -> &mut OperationResult {
        self.subresults.push(OperationResult::new(operation));
        let last = self.subresults.len() - 1;
        &mut self.subresults[last]
    }

    pub fn add_param<K: Into<String>, V: ToString>(&mut self, key: K, value: V) -> &mut Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    pub fn record_status<S: Into<String>>(&mut self, status: OperationResultStatus, message: S) {
        self.status = status;
        self.message = Some(message.into());
    }

    pub fn record_success(&mut self) {
        self.status = OperationResultStatus::Success;
    }

    pub fn record_success_if_unknown(&mut self) {
        if self.is_unknown() {
            self.record_success();
        }
    }

    pub fn record_in_progress(&mut self) {
        self.status = OperationResultStatus::InProgress;
    }

    pub fn record_warning<S: Into<String>>(&mut self, message: S) {
        self.record_status(OperationResultStatus::Warning, message);
    }

    pub fn record_partial_error<S: Into<String>>(&mut self, message: S) {
        self.record_status(OperationResultStatus::PartialError, message);
    }

    pub fn record_fatal_error<S: Into<String>>(&mut self, message: S) {
        self.record_status(OperationResultStatus::FatalError, message);
    }

    pub fn record_not_applicable(&mut self) {
        self.status = OperationResultStatus::NotApplicable;
    }

    pub fn is_unknown(&self) -> bool {
        self.status == OperationResultStatus::Unknown
    }

    pub fn is_success(&self) -> bool {
        self.status == OperationResultStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == OperationResultStatus::InProgress
    }

    pub fn last_subresult(&self) -> Option<&OperationResult> {
        self.subresults.last()
    }

    pub fn last_subresult_status(&self) -> OperationResultStatus {
        self.subresults
            .last()
            .map(|r| r.status)
            .unwrap_or(OperationResultStatus::Unknown)
    }

    /// 从子结果汇总状态
    ///
    /// 自身已显式记录的错误不会被覆盖。致命错误与成功混合视为部分错误，
    /// 全部致命才是致命错误。
    pub fn compute_status(&mut self) {
        if self.status.is_error() {
            return;
        }
        if self.subresults.is_empty() {
            if self.is_unknown() {
                self.status = OperationResultStatus::Success;
            }
            return;
        }

        let mut fatal = 0usize;
        let mut partial = 0usize;
        let mut warning = 0usize;
        let mut in_progress = 0usize;
        let mut message = None;
        for sub in &self.subresults {
            match sub.status {
                OperationResultStatus::FatalError => {
                    fatal += 1;
                    message = message.or_else(|| sub.message.clone());
                }
                OperationResultStatus::PartialError => {
                    partial += 1;
                    message = message.or_else(|| sub.message.clone());
                }
                OperationResultStatus::Warning => {
                    warning += 1;
                    message = message.or_else(|| sub.message.clone());
                }
                OperationResultStatus::InProgress => in_progress += 1,
                _ => {}
            }
        }

        let total = self.subresults.len();
        let computed = if fatal > 0 && fatal == total {
            OperationResultStatus::FatalError
        } else if fatal > 0 || partial > 0 {
            OperationResultStatus::PartialError
        } else if warning > 0 || self.status == OperationResultStatus::Warning {
            OperationResultStatus::Warning
        } else if in_progress > 0 || self.is_in_progress() {
            OperationResultStatus::InProgress
        } else {
            OperationResultStatus::Success
        };

        self.status = computed;
        if computed != OperationResultStatus::Success && self.message.is_none() {
            self.message = message;
        }
    }

    pub fn compute_status_if_unknown(&mut self) {
        if self.is_unknown() {
            self.compute_status();
        }
    }

    /// 深度优先查找指定操作名的第一个子结果
    pub fn find_subresult(&self, operation: &str) -> Option<&OperationResult> {
        for sub in &self.subresults {
            if sub.operation == operation {
                return Some(sub);
            }
            if let Some(found) = sub.find_subresult(operation) {
                return Some(found);
            }
        }
        None
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.status)?;
        if let Some(message) = &self.message {
            write!(f, " ({message})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_status_without_subresults() {
        let mut result = OperationResult::new("op");
        result.compute_status();
        assert!(result.is_success());
    }

    #[test]
    fn test_compute_status_all_fatal() {
        let mut result = OperationResult::new("op");
        result.create_subresult("a").record_fatal_error("boom");
        result.compute_status();
        assert_eq!(result.status, OperationResultStatus::FatalError);
        assert_eq!(result.message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_compute_status_mixed_is_partial() {
        let mut result = OperationResult::new("op");
        result.create_subresult("a").record_fatal_error("boom");
        result.create_subresult("b").record_success();
        result.compute_status();
        assert_eq!(result.status, OperationResultStatus::PartialError);
    }

    #[test]
    fn test_compute_status_keeps_explicit_error() {
        let mut result = OperationResult::new("op");
        result.record_fatal_error("explicit");
        result.create_subresult("a").record_success();
        result.compute_status();
        assert_eq!(result.status, OperationResultStatus::FatalError);
        assert_eq!(result.message.as_deref(), Some("explicit"));
    }

    #[test]
    fn test_compute_status_warning_and_in_progress() {
        let mut result = OperationResult::new("op");
        result.create_subresult("a").record_warning("careful");
        result.create_subresult("b").record_success();
        result.compute_status();
        assert_eq!(result.status, OperationResultStatus::Warning);

        let mut result = OperationResult::new("op");
        result.create_subresult("a").record_in_progress();
        result.compute_status();
        assert!(result.is_in_progress());
    }

    #[test]
    fn test_last_subresult_and_find() {
        let mut result = OperationResult::new("root");
        assert_eq!(result.last_subresult_status(), OperationResultStatus::Unknown);
        let sub = result.create_subresult("outer");
        sub.create_subresult("inner").record_partial_error("half");
        sub.compute_status();
        assert_eq!(result.last_subresult_status(), OperationResultStatus::PartialError);
        let inner = result.find_subresult("inner").unwrap();
        assert_eq!(inner.message.as_deref(), Some("half"));
    }
}
