use chrono::{
    DateTime,
    Utc,
};
use comfy_table::{
    presets,
    Attribute,
    Cell,
    Color,
    ContentArrangement,
    Table,
};
use shardboard_api::wire::{
    ActivityLogs,
    BillingInfo,
    GroupRecord,
};
use shardboard_telemetry::{
    DerivedShardView,
    GroupRegistry,
    PollHealth,
    Severity,
    ShardUpdate,
    ViewSink,
};
use std::{
    collections::BTreeMap,
    sync::Mutex,
};

/// View adapter for the terminal: keeps the latest derived view per shard
/// and renders one table per group on demand. All percentage and severity
/// logic lives on the engine side; this only maps severity to colors.
#[derive(Debug, Default)]
pub struct TableSink {
    views: Mutex<BTreeMap<(String, String), DerivedShardView>>,
    health: Mutex<BTreeMap<String, PollHealth>>,
}

impl ViewSink for TableSink {
    fn shard_updated(&self, update: ShardUpdate) {
        self.views
            .lock()
            .unwrap()
            .insert((update.group_id, update.shard_id), update.view);
    }

    fn poll_health_changed(&self, group_id: &str, health: PollHealth) {
        self.health.lock().unwrap().insert(group_id.to_string(), health);
    }
}

impl TableSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render one table per group, using the registry for group metadata
    /// and chart depth.
    pub fn render(&self, registry: &GroupRegistry) -> String {
        let views = self.views.lock().unwrap();
        let health = self.health.lock().unwrap();
        let mut output = String::new();

        for group in registry.groups() {
            let health = health.get(&group.id).copied().unwrap_or_default();
            let mut table = Table::new();
            table
                .load_preset(presets::UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    Cell::new(format!("{} ({})", group.token, group.group_type))
                        .add_attribute(Attribute::Bold)
                        .fg(health_color(health)),
                    Cell::new("Status"),
                    Cell::new("Req/s"),
                    Cell::new(format!("Req util (max {}/s)", group.max_req_sec)),
                    Cell::new("Stored"),
                    Cell::new(format!("Storage util (max {})", group.max_elements)),
                    Cell::new("Samples"),
                ]);

            if health == PollHealth::Stale {
                table.add_row(vec![Cell::new("telemetry stale: repeated poll failures")
                    .fg(Color::Red)
                    .add_attribute(Attribute::Bold)]);
            }

            let mut shards: Vec<_> = group.shards.values().collect();
            shards.sort_by(|a, b| a.id.cmp(&b.id));
            for shard in shards {
                let Some(view) = views.get(&(group.id.clone(), shard.id.clone())) else {
                    continue;
                };
                table.add_row(vec![
                    Cell::new(shard.token.as_str()),
                    Cell::new(view.status.to_string()),
                    Cell::new(view.requests_per_sec.to_string()),
                    Cell::new(format!("{:.2}%", view.request_utilization_pct)).fg(severity_color(view.severity)),
                    Cell::new(view.stored_elements.to_string()),
                    Cell::new(format!("{:.2}%", view.storage_utilization_pct)),
                    Cell::new(format!(
                        "{}s / {}m",
                        shard.req_sec_series.len(),
                        shard.req_min_series.len()
                    )),
                ]);
            }

            output.push_str(&format!("{table}\n"));
        }

        if output.is_empty() {
            output.push_str("No groups defined\n");
        }
        output
    }
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Normal => Color::Green,
        Severity::Warning => Color::Yellow,
        Severity::Danger => Color::Red,
    }
}

fn health_color(health: PollHealth) -> Color {
    match health {
        PollHealth::Live => Color::Green,
        PollHealth::Stale => Color::Red,
    }
}

/// Table of the groups registered for the account.
pub fn groups_table(groups: &[GroupRecord]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Group", "Type", "Shards", "Max elements", "Max req/s"]);
    for group in groups {
        table.add_row(vec![
            Cell::new(&group.group_id),
            Cell::new(&group.group_type),
            Cell::new(group.num_shards.to_string()),
            Cell::new(group.max_elements.to_string()),
            Cell::new(group.max_req_sec.to_string()),
        ]);
    }
    table
}

pub fn billing_table(info: &BillingInfo) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["#", "Group", "Instances", "Type", "From", "To", "Hours", "Price"]);

    // Most recent first, the way the account panel lists them.
    for (i, line) in info.history.iter().rev().enumerate() {
        let hours = (line.to - line.from) as f64 / 3600.0;
        table.add_row(vec![
            Cell::new(i.to_string()),
            Cell::new(&line.group),
            Cell::new(line.instances.to_string()),
            Cell::new(&line.group_type),
            Cell::new(format_ts(line.from)),
            Cell::new(format_ts(line.to)),
            Cell::new(format!("{hours:.3}")),
            Cell::new(format!("{:.3}", line.price)),
        ]);
    }
    table
}

pub fn activity_logs_table(logs: &ActivityLogs) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["#", "Type", "Date", "IP", "Description"]);

    let mut i = 1;
    let mut categories: Vec<_> = logs.iter().collect();
    categories.sort_by_key(|(category, _)| category.clone());
    for (_, lines) in categories {
        for line in lines {
            // The backend reports `addr:port`; only the address matters.
            let ip = line.ip.split(':').next().unwrap_or(&line.ip);
            table.add_row(vec![
                Cell::new(i.to_string()),
                Cell::new(&line.kind),
                Cell::new(format_ts(line.ts)),
                Cell::new(ip),
                Cell::new(&line.desc),
            ]);
            i += 1;
        }
    }
    table
}

fn format_ts(unix_secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix_secs, 0)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| unix_secs.to_string())
}

#[cfg(test)]
mod test {
    use super::*;
    use shardboard_api::wire::BillingLine;

    #[test]
    fn billing_rows_are_listed_most_recent_first() {
        let info = BillingInfo {
            history: vec![
                BillingLine {
                    group: "old".into(),
                    instances: 1,
                    group_type: "small".into(),
                    from: 0,
                    to: 3600,
                    price: 0.5,
                },
                BillingLine {
                    group: "new".into(),
                    instances: 2,
                    group_type: "large".into(),
                    from: 3600,
                    to: 10800,
                    price: 1.5,
                },
            ],
        };
        let rendered = billing_table(&info).to_string();
        let old_pos = rendered.find("old").unwrap();
        let new_pos = rendered.find("new").unwrap();
        assert!(new_pos < old_pos);
        // Two hours at 3600..10800.
        assert!(rendered.contains("2.000"));
    }

    #[test]
    fn empty_registry_renders_placeholder() {
        let sink = TableSink::new();
        let registry = GroupRegistry::new();
        assert_eq!(sink.render(&registry), "No groups defined\n");
    }
}
