//! Terminal rendering of runs, reputation and events.

use colored::{ColoredString, Colorize};
use warden_kernel::reputation::ReputationRecord;
use warden_types::{AuditLogEntry, Event, EventPayload, RunSnapshot, RunStatus};

pub fn status_label(status: &RunStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        RunStatus::Completed => text.green().bold(),
        RunStatus::Wiped => text.red().bold().reversed(),
        RunStatus::Escalated(_) => text.yellow().bold(),
        RunStatus::Failed(_) => text.red(),
        RunStatus::Pending | RunStatus::Running => text.dimmed(),
    }
}

/// One line per run.
pub fn summary_line(s: &RunSnapshot) -> String {
    let ci = s.classification.map_or("-".to_string(), |c| c.to_string());
    let mode = s.mode.map_or("-".to_string(), |m| m.to_string());
    let action = s
        .decision
        .as_ref()
        .map_or(String::new(), |d| format!("→ {}", d.action));
    format!(
        "  {}  {:<6} {:<9} {}  {}",
        s.run_id.to_string().dimmed(),
        ci,
        mode,
        status_label(&s.status),
        action.bold()
    )
}

pub fn print_snapshot(s: &RunSnapshot) {
    println!("{}", format!("Run {}", s.run_id).bold().underline());
    println!("  Status         : {}", status_label(&s.status));
    println!("  Stage          : {:?}", s.stage);
    if let Some(ci) = s.classification {
        println!("  Classification : {}", ci.to_string().yellow());
    }
    if let Some(mode) = s.mode {
        println!("  Mode           : {}", mode);
    }
    if let Some(d) = &s.decision {
        println!("  Action         : {}", d.action.bold());
        println!("  Resolution     : {:?}", d.resolution);
        println!("  Logic hash     : {}", d.logic_hash.dimmed());
        if d.requires_human_approval {
            println!("  {}", "Human approval required before execution".yellow());
        }
    }
    match &s.anchor {
        Some(anchor) => println!("  Anchor         : {}", anchor.0.cyan()),
        None if s.status.is_terminal() => println!("  Anchor         : {}", "pending".dimmed()),
        None => {}
    }
    if let Some(incident) = &s.incident {
        println!(
            "  {} statistic {:.3}, {} shard(s) and {} output(s) discarded",
            "Collusion:".red().bold(),
            incident.statistic,
            incident.shards_discarded,
            incident.outputs_discarded
        );
    }
    if let Some(err) = &s.error {
        println!("  Error          : {}", err.red());
    }
}

pub fn print_reputation(records: &[(String, ReputationRecord)]) {
    if records.is_empty() {
        println!("  {}", "no reputation recorded yet".dimmed());
        return;
    }
    println!("  {:<20} {:>6} {:>6} {:>7}", "agent", "agree", "dis", "score");
    for (agent, r) in records {
        println!(
            "  {:<20} {:>6} {:>6} {:>7.3}",
            agent.bold(),
            r.agreements,
            r.disagreements,
            r.score()
        );
    }
}

pub fn print_journal(entries: &[AuditLogEntry]) {
    for e in entries {
        println!(
            "  {}  {}  {:<6} {}  {}",
            e.timestamp.format("%H:%M:%S"),
            e.run_id.to_string().dimmed(),
            e.classification.map_or("-".to_string(), |c| c.to_string()),
            status_label(&e.status),
            e.logic_hash.as_deref().unwrap_or("").dimmed()
        );
    }
}

/// Render events an operator must see immediately.  Other events are
/// ignored.
pub fn alert_line(event: &Event) -> Option<String> {
    match &event.payload {
        EventPayload::SecurityIncident(r) => Some(format!(
            "{} run {} wiped (statistic {:.3})",
            "⚠  SECURITY INCIDENT".red().bold(),
            r.run_id,
            r.statistic
        )),
        EventPayload::EscalationRequired {
            run_id, kind, details,
        } => Some(format!(
            "{} run {} needs human review: {} ({})",
            "⚑ ESCALATION".yellow().bold(),
            run_id,
            kind,
            details
        )),
        EventPayload::NotarizationDeferred { run_id, attempts } => Some(format!(
            "{} run {} queued after {} attempt(s)",
            "notary offline:".yellow(),
            run_id,
            attempts
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use warden_types::{FailureKind, IncidentRecord};

    #[test]
    fn alerts_cover_incidents_and_escalations_only() {
        let run_id = Uuid::new_v4();
        let incident = Event::new(
            "test",
            EventPayload::SecurityIncident(IncidentRecord {
                run_id,
                statistic: 0.97,
                pair: None,
                shards_discarded: 3,
                outputs_discarded: 2,
                detected_at: chrono::Utc::now(),
            }),
        );
        assert!(alert_line(&incident).unwrap().contains(&run_id.to_string()));

        let escalation = Event::new(
            "test",
            EventPayload::EscalationRequired {
                run_id,
                kind: FailureKind::SynthesisDeadlock,
                details: "no convergence".into(),
            },
        );
        assert!(alert_line(&escalation).unwrap().contains("no convergence"));

        let finished = Event::new(
            "test",
            EventPayload::RunFinished {
                run_id,
                status: RunStatus::Completed,
            },
        );
        assert!(alert_line(&finished).is_none());
    }

    #[test]
    fn summary_line_without_decision_has_no_action() {
        let mut s = RunSnapshot::pending(Uuid::new_v4());
        s.status = RunStatus::Escalated(FailureKind::AuditQuorumFailure);
        let line = summary_line(&s);
        assert!(line.contains(&s.run_id.to_string()));
        assert!(!line.contains('→'));
    }
}
