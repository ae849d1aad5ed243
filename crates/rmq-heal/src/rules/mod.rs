//! Health rules evaluated against each snapshot.
//!
//! Every rule is a pure function of the current snapshot (plus, for the
//! trend-based rules, the previous one) and returns zero or more findings.
//! The catalogue is closed: rules are compiled in, not configured.
//!
//! # Rules
//! - R1: Unroutable messages (dead-letter exchange / queue backlog)
//! - R2: High connection churn (needs the previous snapshot)
//! - R3: Low disk watermark, absolute or predicted from the previous snapshot
//! - R4: File descriptors near limit
//! - R5: TCP sockets near limit (approximated from channel counts)
//! - R6: RabbitMQ pods down (remediable by pod restart)

pub mod r1_unroutable_messages;
pub mod r2_connection_churn;
pub mod r3_disk_watermark;
pub mod r4_file_descriptors;
pub mod r5_tcp_sockets;
pub mod r6_broker_down;
pub mod types;

pub use types::{
    Finding, RemediationAction, Rule, RuleContext, RuleId, Severity, SubjectKind,
};

use std::collections::HashSet;
use tracing::warn;

/// Ordered catalogue of rules, unique by [`RuleId`]
pub struct RuleRegistry {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleRegistry {
    /// Create a registry with every built-in rule, in catalogue order
    pub fn new() -> Self {
        Self::with_rules(vec![
            Box::new(r1_unroutable_messages::Handler::new()),
            Box::new(r2_connection_churn::Handler::new()),
            Box::new(r3_disk_watermark::Handler::new()),
            Box::new(r4_file_descriptors::Handler::new()),
            Box::new(r5_tcp_sockets::Handler::new()),
            Box::new(r6_broker_down::Handler::new()),
        ])
    }

    /// Build a registry from an explicit list; later duplicates of an ID are dropped
    pub fn with_rules(rules: Vec<Box<dyn Rule>>) -> Self {
        let mut seen = HashSet::new();
        let rules = rules
            .into_iter()
            .filter(|rule| {
                let fresh = seen.insert(rule.id());
                if !fresh {
                    warn!(rule = rule.id().as_str(), "Duplicate rule ignored");
                }
                fresh
            })
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.iter().map(AsRef::as_ref)
    }

    pub fn ids(&self) -> Vec<RuleId> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
