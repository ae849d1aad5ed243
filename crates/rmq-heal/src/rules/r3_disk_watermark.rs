//! R3: Low Disk Watermark Predicted
//!
//! For each node the margin `disk_free - disk_free_limit` is checked against
//! an absolute floor. With a previous snapshot the margin's rate of change is
//! extrapolated linearly; a predicted exhaustion inside the horizon is as
//! critical as an already-thin margin.

use super::types::{Finding, Rule, RuleContext, RuleId, Severity, SubjectKind};
use crate::snapshot::{NodeInfo, Snapshot};

const MIB: f64 = 1024.0 * 1024.0;

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

/// Seconds until the margin reaches zero at the observed shrink rate
fn predict_exhaustion_secs(
    node: &NodeInfo,
    snapshot: &Snapshot,
    previous: &Snapshot,
) -> Option<f64> {
    let before = previous.node(&node.name)?;
    let elapsed = (snapshot.fetched_at - previous.fetched_at).num_milliseconds() as f64 / 1000.0;
    if elapsed <= 0.0 {
        return None;
    }
    let shrink = (before.disk_margin_bytes() - node.disk_margin_bytes()) as f64;
    if shrink <= 0.0 {
        return None;
    }
    let rate = shrink / elapsed;
    Some(node.disk_margin_bytes().max(0) as f64 / rate)
}

impl Rule for Handler {
    fn id(&self) -> RuleId {
        RuleId::LowDiskWatermarkPredicted
    }

    fn evaluate(&self, snapshot: &Snapshot, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let Some(nodes) = snapshot.nodes.available() else {
            return Vec::new();
        };
        let config = &ctx.config.disk;

        nodes
            .iter()
            .map(|node| {
                let margin = node.disk_margin_bytes();
                let prediction =
                    ctx.previous.and_then(|prev| predict_exhaustion_secs(node, snapshot, prev));

                let (severity, message) = if margin < config.min_margin_bytes as i64 {
                    (
                        Severity::Critical,
                        format!(
                            "Node {} has {:.2} MB free above its disk limit (threshold {:.2} MB)",
                            node.name,
                            margin as f64 / MIB,
                            config.min_margin_bytes as f64 / MIB
                        ),
                    )
                } else if let Some(secs) =
                    prediction.filter(|secs| *secs <= config.horizon_secs as f64)
                {
                    (
                        Severity::Critical,
                        format!(
                            "Node {} is predicted to hit its disk free limit in {:.0} minutes",
                            node.name,
                            secs / 60.0
                        ),
                    )
                } else {
                    (
                        Severity::Info,
                        format!(
                            "Node {} disk: {:.2} MB free, limit {:.2} MB",
                            node.name,
                            node.disk_free_bytes as f64 / MIB,
                            node.disk_free_limit_bytes as f64 / MIB
                        ),
                    )
                };

                let mut finding =
                    Finding::new(RuleId::LowDiskWatermarkPredicted, SubjectKind::Node, &node.name, message)
                        .with_severity(severity)
                        .with_context("disk_free_bytes", node.disk_free_bytes.to_string())
                        .with_context("disk_free_limit_bytes", node.disk_free_limit_bytes.to_string())
                        .with_context("margin_bytes", margin.to_string())
                        .with_context("mem_used_bytes", node.mem_used_bytes.to_string())
                        .with_context("mem_limit_bytes", node.mem_limit_bytes.to_string())
                        .at(snapshot.fetched_at);
                if let Some(secs) = prediction {
                    finding = finding.with_context("predicted_exhaustion_secs", format!("{secs:.0}"));
                }
                finding
            })
            .collect()
    }
}
