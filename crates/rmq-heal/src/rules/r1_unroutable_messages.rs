//! R1: Unroutable Messages
//!
//! Checks dead-lettering for every queue. A queue with an
//! `x-dead-letter-exchange` argument is cross-referenced with its dead-letter
//! queue, located by naming convention (`dlq.<queue>` by default). The
//! convention is a heuristic: the DLQ's actual binding to the exchange and
//! routing key is not resolved.
//!
//! - DLQ backlog with no consumers -> warning on the source queue
//! - DLQ present but the DLX has no bindings -> warning (messages are dropped)
//! - DLQ not found, or counters still settling -> info (insufficient evidence)
//! - queue without a DLX -> info
//! - DLQ-named queue whose source has no DLX -> warning on backlog without
//!   consumers, info otherwise

use super::types::{Finding, Rule, RuleContext, RuleId, Severity, SubjectKind};
use crate::config::UnroutableConfig;
use crate::snapshot::{QueueInfo, QueueMap, Snapshot};

pub const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";
pub const DEAD_LETTER_ROUTING_KEY_ARG: &str = "x-dead-letter-routing-key";

pub struct Handler;

impl Handler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Handler {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for Handler {
    fn id(&self) -> RuleId {
        RuleId::UnroutableMessages
    }

    fn evaluate(&self, snapshot: &Snapshot, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let config = &ctx.config.unroutable;
        let mut findings = Vec::new();

        for (vhost, listing) in &snapshot.queues {
            let Some(queues) = listing.available() else {
                continue;
            };

            for queue in queues.values() {
                if queue.arguments.contains_key(DEAD_LETTER_EXCHANGE_ARG) {
                    findings.push(check_dead_lettered_queue(snapshot, config, vhost, queue));
                } else if let Some(source) = config.source_queue_of(&queue.name) {
                    if let Some(finding) = check_orphan_dlq(snapshot, queues, vhost, source, queue)
                    {
                        findings.push(finding);
                    }
                } else if config.report_queues_without_dlx {
                    findings.push(
                        Finding::new(
                            RuleId::UnroutableMessages,
                            SubjectKind::Queue,
                            &queue.name,
                            format!("Queue {} has no dead-letter exchange", queue.name),
                        )
                        .with_severity(Severity::Info)
                        .with_context("vhost", vhost.clone())
                        .at(snapshot.fetched_at),
                    );
                }
            }
        }

        findings
    }
}

fn check_dead_lettered_queue(
    snapshot: &Snapshot,
    config: &UnroutableConfig,
    vhost: &str,
    queue: &QueueInfo,
) -> Finding {
    let dlx = queue
        .argument_str(DEAD_LETTER_EXCHANGE_ARG)
        .unwrap_or_default()
        .to_string();
    let routing_key = queue
        .argument_str(DEAD_LETTER_ROUTING_KEY_ARG)
        .unwrap_or("(not set)")
        .to_string();
    let dlq_name = config.dead_letter_queue_for(&queue.name);

    let finding = |severity: Severity, message: String| {
        Finding::new(
            RuleId::UnroutableMessages,
            SubjectKind::Queue,
            &queue.name,
            message,
        )
        .with_severity(severity)
        .with_context("vhost", vhost)
        .with_context("dead_letter_exchange", dlx.clone())
        .with_context("dead_letter_routing_key", routing_key.clone())
        .with_context("dead_letter_queue", dlq_name.clone())
        .at(snapshot.fetched_at)
    };

    let Some(dlq) = snapshot.queue(vhost, &dlq_name) else {
        return finding(
            Severity::Info,
            format!(
                "Queue {} dead-letters to '{}' but {} was not found; backlog unknown",
                queue.name, dlx, dlq_name
            ),
        );
    };

    if dlq.messages_total > 0 && dlq.consumers == 0 {
        if !dlq.counters_consistent() {
            return finding(
                Severity::Info,
                format!(
                    "Dead-letter queue {} reports {} messages but its counters are still settling",
                    dlq_name, dlq.messages_total
                ),
            )
            .with_context("messages", dlq.messages_total.to_string());
        }
        return finding(
            Severity::Warning,
            format!(
                "{} dead-lettered messages from {} accumulating in {} with no consumers",
                dlq.messages_total, queue.name, dlq_name
            ),
        )
        .with_context("messages", dlq.messages_total.to_string())
        .with_context("consumers", "0");
    }

    // The default exchange ("") routes by queue name and has no listed bindings.
    if !dlx.is_empty() {
        if let Some(bindings) = snapshot.bindings_from(vhost, &dlx) {
            if bindings.is_empty() {
                return finding(
                    Severity::Warning,
                    format!(
                        "Dead-letter exchange '{}' of {} has no bindings; dead-lettered messages are dropped",
                        dlx, queue.name
                    ),
                );
            }
        }
    }

    finding(
        Severity::Info,
        format!(
            "Queue {} dead-letters to '{}' ({}: {} messages, {} consumers)",
            queue.name, dlx, dlq_name, dlq.messages_total, dlq.consumers
        ),
    )
    .with_context("messages", dlq.messages_total.to_string())
    .with_context("consumers", dlq.consumers.to_string())
}

/// A DLQ-named queue whose source queue does not declare a DLX itself
fn check_orphan_dlq(
    snapshot: &Snapshot,
    queues: &QueueMap,
    vhost: &str,
    source: &str,
    dlq: &QueueInfo,
) -> Option<Finding> {
    let source_queue = queues.get(source);
    // Already reported through the source queue.
    if source_queue.is_some_and(|q| q.arguments.contains_key(DEAD_LETTER_EXCHANGE_ARG)) {
        return None;
    }
    let source_state = if source_queue.is_some() {
        format!("source queue {source} has no dead-letter exchange")
    } else {
        format!("source queue {source} not found")
    };

    let finding = |severity: Severity, message: String| {
        Finding::new(RuleId::UnroutableMessages, SubjectKind::Queue, &dlq.name, message)
            .with_severity(severity)
            .with_context("vhost", vhost)
            .with_context("source_queue", source)
            .with_context("dead_letter_exchange", "(none)")
            .with_context("messages", dlq.messages_total.to_string())
            .with_context("consumers", dlq.consumers.to_string())
            .at(snapshot.fetched_at)
    };

    let finding = if !dlq.counters_consistent() {
        finding(
            Severity::Info,
            format!(
                "Dead-letter queue {} reports {} messages but its counters are still settling; {}",
                dlq.name, dlq.messages_total, source_state
            ),
        )
    } else if dlq.messages_total > 0 && dlq.consumers == 0 {
        finding(
            Severity::Warning,
            format!(
                "Dead-letter queue {} holds {} messages with no consumers; {}",
                dlq.name, dlq.messages_total, source_state
            ),
        )
    } else {
        finding(
            Severity::Info,
            format!(
                "Dead-letter queue {} ({} messages, {} consumers); {}",
                dlq.name, dlq.messages_total, dlq.consumers, source_state
            ),
        )
    };
    Some(finding)
}
