use std::sync::Arc;

use chrono::Local;
use itertools::Itertools;

use crate::registry::ClientInfo;

fn row(start: &str, client_type: &str, node: &str, status: &str, message: &str) -> String {
    format!("{start:<13} {client_type:<10} {node:<15} {status:<9} {message}")
}

/// Human readable status of every registered worker, one body line per report line.
///
/// The report starts with an empty line followed by the header and a dash rule as wide as the
/// widest line. Rows are sorted as text.
pub fn cluster_status(clients: &[Arc<ClientInfo>]) -> Vec<String> {
    let header = row("Start", "Type", "Node", "Status", "Message from client");
    let rows: Vec<String> = clients
        .iter()
        .map(|c| {
            row(
                &c.started_at().with_timezone(&Local).format("%H:%M:%S").to_string(),
                &c.client_type().to_string(),
                c.node(),
                &c.status().to_string(),
                &c.last_message(),
            )
        })
        .sorted()
        .dedup()
        .collect();
    let width = rows
        .iter()
        .chain(std::iter::once(&header))
        .map(|line| line.chars().count())
        .max()
        .unwrap_or_default();

    let mut report = Vec::with_capacity(rows.len() + 3);
    report.push(String::new());
    report.push(header);
    report.push("-".repeat(width));
    report.extend(rows);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ClientRegistry, ClientType, Status};

    #[test]
    fn empty_report() {
        let report = cluster_status(&[]);
        assert_eq!(report.len(), 3);
        assert_eq!(report[0], "");
        assert_eq!(
            report[1],
            "Start         Type       Node            Status    Message from client"
        );
        assert_eq!(report[2], "-".repeat(report[1].len()));
    }

    #[test]
    fn rows_are_sorted_and_rule_is_widest() {
        let registry = ClientRegistry::new();
        // registered first, so it sorts first even across a second boundary
        let batch = registry.register(ClientType::Batch, "node-a".into()).unwrap();
        let online = registry
            .register(ClientType::OnlineApp, "node-b".into())
            .unwrap();
        registry
            .update_status(
                &batch,
                Status::Running,
                "a rather long message from the batch client exceeding the header".into(),
            )
            .unwrap();
        registry.mark_down(&online, "Connection closed by the client.".into());

        let report = cluster_status(&registry.snapshot());
        assert_eq!(report.len(), 5);
        let rows = &report[3..];
        assert!(rows[0][14..].starts_with("BATCH      node-a          RUNNING   a rather"));
        assert!(rows[1][14..].starts_with("ONLINE_APP node-b          DOWN      Connection"));
        assert_eq!(report[2].len(), rows[0].len());
        assert!(rows[0].len() > report[1].len());
    }
}
