use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::class::ClassTable;
use crate::error::FilterError;
use crate::packet::PacketMeta;

#[cfg_attr(
    feature = "serde",
    derive(Deserialize, Serialize),
    serde(rename_all = "snake_case")
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Allow,
    Deny,
}

#[cfg_attr(
    feature = "serde",
    derive(Deserialize, Serialize),
    serde(rename_all = "snake_case")
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Top,
    Bottom,
}

#[derive(Debug)]
pub struct FilterRule {
    kind: FilterKind,
    class: String,
    // Updated by concurrent producers holding only a read lock on the list
    passed: AtomicU64,
    failed: AtomicU64,
}

impl FilterRule {
    fn new(kind: FilterKind, class: String) -> Self {
        Self {
            kind,
            class,
            passed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn info(&self) -> FilterRuleInfo {
        FilterRuleInfo {
            kind: self.kind,
            class: self.class.clone(),
            passed: self.passed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRuleInfo {
    pub kind: FilterKind,
    pub class: String,
    pub passed: u64,
    pub failed: u64,
}

/// Ordered deny-list firewall over traffic classes.
///
/// Evaluation drops a packet when the first matching deny rule is hit. Allow
/// rules only count the packets they match; a packet that hits no deny rule is
/// admitted.
#[derive(Debug, Default)]
pub struct FilterList {
    rules: Vec<FilterRule>,
    enabled: bool,
}

impl FilterList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        debug!(enabled, "Set filtering");
        self.enabled = enabled;
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FilterRule> {
        self.rules.get(index)
    }

    pub fn list(&self) -> Vec<FilterRuleInfo> {
        self.rules.iter().map(FilterRule::info).collect()
    }

    /// Append a rule, returning its index.
    pub fn append(
        &mut self,
        kind: FilterKind,
        class: &str,
        table: &ClassTable,
    ) -> Result<usize, FilterError> {
        if !table.contains(class) {
            return Err(FilterError::UnknownClass(class.to_string()));
        }
        if self.references(class) {
            return Err(FilterError::DuplicateRule(class.to_string()));
        }
        debug!(?kind, class, "Append filter rule");
        self.rules.push(FilterRule::new(kind, class.to_string()));
        Ok(self.rules.len() - 1)
    }

    pub fn delete(&mut self, index: usize) -> Result<FilterRuleInfo, FilterError> {
        if index >= self.rules.len() {
            return Err(FilterError::IndexOutOfRange(index));
        }
        let rule = self.rules.remove(index);
        debug!(index, class = %rule.class, "Delete filter rule");
        Ok(rule.info())
    }

    /// Move a rule, returning its new index. Moving past either end is a no-op.
    pub fn reorder(&mut self, index: usize, direction: Direction) -> Result<usize, FilterError> {
        let len = self.rules.len();
        if index >= len {
            return Err(FilterError::IndexOutOfRange(index));
        }
        let target = match direction {
            Direction::Up => index.saturating_sub(1),
            Direction::Down => (index + 1).min(len - 1),
            Direction::Top => 0,
            Direction::Bottom => len - 1,
        };
        let rule = self.rules.remove(index);
        self.rules.insert(target, rule);
        debug!(index, target, ?direction, "Move filter rule");
        Ok(target)
    }

    pub fn flush(&mut self) {
        debug!(count = self.rules.len(), "Flush filter rules");
        self.rules.clear();
    }

    pub fn references(&self, class: &str) -> bool {
        self.rules.iter().any(|r| r.class == class)
    }

    /// Returns `true` if the packet must be dropped.
    pub fn evaluate(&self, table: &ClassTable, meta: Option<&PacketMeta>) -> bool {
        if !self.enabled {
            return false;
        }
        for rule in &self.rules {
            if !table.matches(&rule.class, meta) {
                continue;
            }
            match rule.kind {
                FilterKind::Deny => {
                    rule.failed.fetch_add(1, Ordering::Relaxed);
                    trace!(class = %rule.class, "Packet denied by filter");
                    return true;
                }
                FilterKind::Allow => {
                    rule.passed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        false
    }
}
