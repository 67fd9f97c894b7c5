//! Dana plugin: knowledge sharing between agents through an exchange
//! directory.
//!
//! At the end of each run the plugin writes a knowledge packet — gifts
//! distilled from what the run learned — into the exchange directory. At
//! install time it imports packets left by other agents: skill gifts go to
//! the skill store, proverb gifts to the karma store (or the failure store
//! when no karma store is configured).

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agent::ZenAgent;
use crate::error::Result;
use crate::store::{
    FailureEntry, KarmaEntry, KarmaType, Severity, SkillEntry, write_json_atomic,
};

use super::{EvolutionReport, Plugin};

/// One shareable piece of knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum KnowledgeGift {
    /// A concrete skill.
    #[serde(rename_all = "camelCase")]
    Skill {
        /// The situation that calls for the skill.
        trigger: String,
        /// The concrete command.
        command: String,
        /// When the command applies.
        condition: String,
    },
    /// A failure proverb.
    #[serde(rename_all = "camelCase")]
    Proverb {
        /// The distilled wisdom.
        proverb: String,
        /// The condition it was learned under.
        condition: String,
        /// How severe the originating failure was.
        severity: Severity,
    },
}

/// A knowledge packet exchanged between agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgePacket {
    /// Packet format version. Always 1.
    pub version: u32,
    /// Id of the agent that wrote the packet.
    pub source_agent_id: String,
    /// When the packet was written.
    pub created_at: DateTime<Utc>,
    /// The shared knowledge.
    pub gifts: Vec<KnowledgeGift>,
    /// Strategies that worked for the source agent.
    pub strategies: Vec<String>,
    /// One-line summary of the source run.
    pub evolution_summary: String,
}

/// Knowledge sharing through a packet exchange directory.
#[derive(Debug)]
pub struct DanaPlugin {
    agent_id: String,
    exchange_dir: PathBuf,
}

impl DanaPlugin {
    /// Create the plugin for `agent_id`, exchanging packets in
    /// `exchange_dir`.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, exchange_dir: impl Into<PathBuf>) -> Self {
        Self { agent_id: agent_id.into(), exchange_dir: exchange_dir.into() }
    }

    /// Packets in the exchange dir written by other agents.
    fn foreign_packets(&self) -> Vec<KnowledgePacket> {
        let Ok(entries) = std::fs::read_dir(&self.exchange_dir) else {
            return Vec::new();
        };
        let own_prefix = format!("dana_{}_", self.agent_id);
        let mut packets = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.starts_with("dana_")
                || !file_name.ends_with(".json")
                || file_name.starts_with(&own_prefix)
            {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|data| serde_json::from_str(&data).map_err(|e| e.to_string()))
            {
                Ok(packet) => packets.push(packet),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable packet"),
            }
        }
        packets
    }
}

#[async_trait]
impl Plugin for DanaPlugin {
    fn name(&self) -> &str {
        "dana"
    }

    async fn install(&self, agent: &mut ZenAgent) -> Result<()> {
        let packets = self.foreign_packets();
        let mut imported = 0usize;
        for packet in packets {
            let source = packet.source_agent_id.clone();
            for gift in packet.gifts {
                match gift {
                    KnowledgeGift::Skill { trigger, command, condition } => {
                        if let Some(skills) = agent.skill_store_mut() {
                            skills.store(SkillEntry::new(trigger, command, condition)).await?;
                            imported += 1;
                        }
                    }
                    KnowledgeGift::Proverb { proverb, condition, severity } => {
                        if let Some(karma) = agent.karma_store_mut() {
                            karma
                                .store(KarmaEntry::new(
                                    proverb,
                                    condition,
                                    severity,
                                    source.clone(),
                                    KarmaType::Unskillful,
                                ))
                                .await?;
                            imported += 1;
                        } else if let Some(failures) = agent.failure_store_mut() {
                            failures
                                .store(FailureEntry::new(proverb, condition, severity))
                                .await?;
                            imported += 1;
                        }
                    }
                }
            }
        }
        if imported > 0 {
            info!(imported, "imported knowledge gifts from exchange");
        }
        Ok(())
    }

    async fn on_evolution(&self, report: &EvolutionReport) -> Result<()> {
        let gifts: Vec<KnowledgeGift> = report
            .new_failures
            .iter()
            .map(|failure| KnowledgeGift::Proverb {
                proverb: failure.proverb.clone(),
                condition: failure.condition.clone(),
                severity: failure.severity,
            })
            .collect();
        if gifts.is_empty() && report.strategies.is_empty() {
            debug!("nothing to share, skipping packet");
            return Ok(());
        }
        let packet = KnowledgePacket {
            version: 1,
            source_agent_id: self.agent_id.clone(),
            created_at: Utc::now(),
            gifts,
            strategies: report.strategies.clone(),
            evolution_summary: report.summary.clone(),
        };
        let file_name =
            format!("dana_{}_{}.json", self.agent_id, packet.created_at.timestamp_millis());
        write_json_atomic(&self.exchange_dir.join(file_name), &packet)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::agent::state::RunStatus;

    fn report(failures: Vec<FailureEntry>) -> EvolutionReport {
        EvolutionReport {
            agent_id: "agent-a".into(),
            goal: "test".into(),
            status: RunStatus::Done,
            step_count: 3,
            new_failures: failures,
            habitual_patterns: Vec::new(),
            strategies: vec!["read before writing".into()],
            summary: "learned about files".into(),
        }
    }

    #[tokio::test]
    async fn evolution_writes_a_packet() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = DanaPlugin::new("agent-a", dir.path());

        plugin
            .on_evolution(&report(vec![FailureEntry::new("haste", "rushed", Severity::Low)]))
            .await
            .unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().into_string().unwrap();
        assert!(name.starts_with("dana_agent-a_"), "{name}");

        let packet: KnowledgePacket =
            serde_json::from_str(&std::fs::read_to_string(files[0].path()).unwrap()).unwrap();
        assert_eq!(packet.version, 1);
        assert_eq!(packet.gifts.len(), 1);
    }

    #[tokio::test]
    async fn foreign_packets_exclude_own() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DanaPlugin::new("agent-a", dir.path());
        writer
            .on_evolution(&report(vec![FailureEntry::new("p", "c", Severity::Med)]))
            .await
            .unwrap();

        let reader_own = DanaPlugin::new("agent-a", dir.path());
        assert!(reader_own.foreign_packets().is_empty());

        let reader_other = DanaPlugin::new("agent-b", dir.path());
        assert_eq!(reader_other.foreign_packets().len(), 1);
    }

    #[tokio::test]
    async fn empty_report_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = DanaPlugin::new("agent-a", dir.path());
        let mut empty = report(Vec::new());
        empty.strategies.clear();
        plugin.on_evolution(&empty).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn gift_serialization_is_tagged() {
        let gift = KnowledgeGift::Proverb {
            proverb: "p".into(),
            condition: "c".into(),
            severity: Severity::High,
        };
        let json = serde_json::to_value(&gift).unwrap();
        assert_eq!(json["kind"], "proverb");
        assert_eq!(json["severity"], "HIGH");
    }
}
