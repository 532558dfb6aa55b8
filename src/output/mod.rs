/// Rendering of pod records for the terminal
///
/// `get` output comes in a kubectl-like table (optionally wide) or as the raw
/// pod objects in JSON/YAML; `describe` produces a multi-section text dump.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use k8s_openapi::api::core::v1::{Container, ContainerStatus, Event, Volume};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{settings::Style, Table, Tabled};

use crate::k8s::PodRecord;

const NONE: &str = "<none>";

/// Alternative formats for `get`. The default is a plain table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Table with IP, node and readiness columns
    Wide,
    Json,
    Yaml,
}

#[derive(Tabled)]
struct PodRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "READY")]
    ready: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "RESTARTS")]
    restarts: i32,
    #[tabled(rename = "AGE")]
    age: String,
}

#[derive(Tabled)]
struct WidePodRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "READY")]
    ready: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "RESTARTS")]
    restarts: i32,
    #[tabled(rename = "AGE")]
    age: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "NODE")]
    node: String,
    #[tabled(rename = "NOMINATED NODE")]
    nominated_node: String,
    #[tabled(rename = "READINESS GATES")]
    readiness_gates: String,
}

/// Format pods for `get`
///
/// # Arguments
/// * `pods` - Matched pods, in resolver order
/// * `format` - `None` for the default table
/// * `now` - Reference time for the AGE column
pub fn format_pods(
    pods: &[PodRecord],
    format: Option<OutputFormat>,
    now: DateTime<Utc>,
) -> Result<String> {
    match format {
        None => {
            let rows: Vec<PodRow> = pods
                .iter()
                .map(|p| PodRow {
                    name: p.name.clone(),
                    ready: ready_column(p.ready_counts()),
                    status: p.phase.clone(),
                    restarts: p.restarts(),
                    age: format_age(p.created_at(), now),
                })
                .collect();
            Ok(Table::new(rows).with(Style::blank()).to_string())
        }
        Some(OutputFormat::Wide) => {
            let rows: Vec<WidePodRow> = pods
                .iter()
                .map(|p| WidePodRow {
                    name: p.name.clone(),
                    ready: ready_column(p.ready_counts()),
                    status: p.phase.clone(),
                    restarts: p.restarts(),
                    age: format_age(p.created_at(), now),
                    ip: p.pod_ip().unwrap_or(NONE).to_string(),
                    node: or_none(&p.node_name),
                    nominated_node: p.nominated_node().unwrap_or(NONE).to_string(),
                    readiness_gates: p
                        .readiness_gates()
                        .map(|gates| gates.join(", "))
                        .unwrap_or_else(|| NONE.to_string()),
                })
                .collect();
            Ok(Table::new(rows).with(Style::blank()).to_string())
        }
        Some(OutputFormat::Json) => {
            let docs = pods
                .iter()
                .map(|p| {
                    serde_json::to_string_pretty(&p.pod)
                        .with_context(|| format!("Failed to encode pod {} as JSON", p.name))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(docs.join("\n"))
        }
        Some(OutputFormat::Yaml) => {
            let docs = pods
                .iter()
                .map(|p| {
                    serde_yaml::to_string(&p.pod)
                        .with_context(|| format!("Failed to encode pod {} as YAML", p.name))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(docs.join("---\n"))
        }
    }
}

fn ready_column((ready, total): (usize, usize)) -> String {
    format!("{}/{}", ready, total)
}

fn or_none(value: &str) -> String {
    if value.is_empty() {
        NONE.to_string()
    } else {
        value.to_string()
    }
}

/// Compact age like kubectl prints it: `42s`, `5m12s`, `3h20m`, `12d`
pub fn format_age(created: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(created) = created else {
        return "<unknown>".to_string();
    };

    let secs = (now - created).num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        match secs % 60 {
            0 => format!("{}m", mins),
            rest if mins < 10 => format!("{}m{}s", mins, rest),
            _ => format!("{}m", mins),
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        match (secs % 3600) / 60 {
            0 => format!("{}h", hours),
            rest if hours < 8 => format!("{}h{}m", hours, rest),
            _ => format!("{}h", hours),
        }
    } else {
        let days = secs / 86400;
        match (secs % 86400) / 3600 {
            rest if days < 8 && rest > 0 => format!("{}d{}h", days, rest),
            _ => format!("{}d", days),
        }
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%a, %d %b %Y %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| NONE.to_string())
}

/// kubectl-style description of a pod and its events
pub fn describe_pod(record: &PodRecord, events: &[Event], now: DateTime<Utc>) -> String {
    let pod = &record.pod;
    let spec = pod.spec.clone().unwrap_or_default();
    let status = pod.status.clone().unwrap_or_default();
    let mut out = String::new();

    let _ = writeln!(out, "Name:         {}", record.name);
    let _ = writeln!(out, "Namespace:    {}", record.namespace);
    let _ = writeln!(out, "Priority:     {}", spec.priority.unwrap_or(0));
    let _ = writeln!(
        out,
        "Node:         {}/{}",
        or_none(&record.node_name),
        status.host_ip.as_deref().unwrap_or("")
    );
    let _ = writeln!(
        out,
        "Start Time:   {}",
        format_time(status.start_time.as_ref().map(|t| t.0))
    );
    write_map(&mut out, "Labels:", pod.metadata.labels.as_ref());
    write_map(&mut out, "Annotations:", pod.metadata.annotations.as_ref());
    let _ = writeln!(out, "Status:       {}", record.phase);
    let _ = writeln!(out, "IP:           {}", record.pod_ip().unwrap_or(""));

    match record.owners.first() {
        Some(owner) => {
            let _ = writeln!(out, "Controlled By:  {}/{}", owner.kind, owner.name);
        }
        None => {
            let _ = writeln!(out, "Controlled By:  {}", NONE);
        }
    }

    out.push_str("Containers:\n");
    let statuses = status.container_statuses.as_deref().unwrap_or_default();
    for container in &spec.containers {
        let container_status = statuses.iter().find(|s| s.name == container.name);
        write_container(&mut out, container, container_status);
    }

    out.push_str("Conditions:\n");
    for condition in status.conditions.iter().flatten() {
        let _ = writeln!(out, "  {:<20} {}", condition.type_, condition.status);
    }

    out.push_str("Volumes:\n");
    for volume in spec.volumes.iter().flatten() {
        write_volume(&mut out, volume);
    }

    let _ = writeln!(
        out,
        "QoS Class:    {}",
        status.qos_class.as_deref().unwrap_or(NONE)
    );

    out.push_str("Node-Selectors:\n");
    for (key, value) in spec.node_selector.iter().flatten() {
        let _ = writeln!(out, "  {}={}", key, value);
    }

    out.push_str("Tolerations:\n");
    for toleration in spec.tolerations.iter().flatten() {
        let _ = writeln!(
            out,
            "  {}:{} op={}",
            toleration.key.as_deref().unwrap_or(""),
            toleration.value.as_deref().unwrap_or(""),
            toleration.operator.as_deref().unwrap_or("Equal")
        );
    }

    write_events(&mut out, events, now);
    out
}

fn write_map(out: &mut String, title: &str, map: Option<&BTreeMap<String, String>>) {
    match map.filter(|m| !m.is_empty()) {
        Some(map) => {
            let _ = writeln!(out, "{}", title);
            for (key, value) in map {
                let _ = writeln!(out, "              {}: {}", key, value);
            }
        }
        None => {
            let _ = writeln!(out, "{:<14}{}", title, NONE);
        }
    }
}

fn write_container(out: &mut String, container: &Container, status: Option<&ContainerStatus>) {
    let _ = writeln!(out, "  {}:", container.name);
    let _ = writeln!(
        out,
        "    Container ID:   {}",
        status.and_then(|s| s.container_id.as_deref()).unwrap_or("")
    );
    let _ = writeln!(
        out,
        "    Image:          {}",
        container.image.as_deref().unwrap_or("")
    );
    let _ = writeln!(
        out,
        "    Image ID:       {}",
        status.map(|s| s.image_id.as_str()).unwrap_or("")
    );

    for port in container.ports.iter().flatten() {
        let _ = writeln!(out, "      - Port:       {}", port.container_port);
        let _ = writeln!(out, "        Host Port:  {}", port.host_port.unwrap_or(0));
    }

    if let Some(command) = container.command.as_ref().filter(|c| !c.is_empty()) {
        out.push_str("    Command:\n");
        for part in command {
            let _ = writeln!(out, "      {}", part);
        }
    }

    let state = status.and_then(|s| s.state.as_ref());
    match state {
        Some(state) if state.running.is_some() => {
            let started = state.running.as_ref().and_then(|r| r.started_at.as_ref());
            let _ = writeln!(out, "    State:          Running");
            let _ = writeln!(out, "      Started:      {}", format_time(started.map(|t| t.0)));
        }
        Some(state) if state.terminated.is_some() => {
            let exit_code = state.terminated.as_ref().map(|t| t.exit_code).unwrap_or(0);
            let _ = writeln!(out, "    State:          Terminated");
            let _ = writeln!(out, "      Exit Code:    {}", exit_code);
        }
        Some(state) if state.waiting.is_some() => {
            let reason = state.waiting.as_ref().and_then(|w| w.reason.as_deref());
            let _ = writeln!(out, "    State:          Waiting");
            if let Some(reason) = reason {
                let _ = writeln!(out, "      Reason:       {}", reason);
            }
        }
        _ => {
            let _ = writeln!(out, "    State:          Unknown");
        }
    }

    let ready = status.map(|s| s.ready).unwrap_or(false);
    let _ = writeln!(out, "    Ready:          {}", if ready { "True" } else { "False" });
    let _ = writeln!(
        out,
        "    Restart Count:  {}",
        status.map(|s| s.restart_count).unwrap_or(0)
    );

    out.push_str("    Environment:\n");
    for env in container.env.iter().flatten() {
        match &env.value {
            Some(value) => {
                let _ = writeln!(out, "      {}={}", env.name, value);
            }
            None => {
                let _ = writeln!(out, "      {}  (from source)", env.name);
            }
        }
    }

    out.push_str("    Mounts:\n");
    for mount in container.volume_mounts.iter().flatten() {
        let mut line = format!("      {} from {}", mount.mount_path, mount.name);
        if let Some(sub_path) = mount.sub_path.as_deref().filter(|s| !s.is_empty()) {
            let _ = write!(line, " (subpath: {})", sub_path);
        }
        line.push_str(if mount.read_only.unwrap_or(false) {
            " (ro)"
        } else {
            " (rw)"
        });
        let _ = writeln!(out, "{}", line);
    }
}

fn write_volume(out: &mut String, volume: &Volume) {
    let _ = writeln!(out, "  {}:", volume.name);

    if let Some(host_path) = &volume.host_path {
        let _ = writeln!(out, "    Type:          HostPath (bare host directory volume)");
        let _ = writeln!(out, "    Path:          {}", host_path.path);
    } else if volume.empty_dir.is_some() {
        let _ = writeln!(out, "    Type:          EmptyDir (a temporary directory that shares a pod's lifetime)");
    } else if let Some(secret) = &volume.secret {
        let _ = writeln!(out, "    Type:          Secret (a volume populated by a Secret)");
        let _ = writeln!(
            out,
            "    SecretName:    {}",
            secret.secret_name.as_deref().unwrap_or("")
        );
    } else if let Some(projected) = &volume.projected {
        let _ = writeln!(out, "    Type:                    Projected");
        for source in projected.sources.iter().flatten() {
            if let Some(token) = &source.service_account_token {
                let _ = writeln!(
                    out,
                    "    TokenExpirationSeconds:  {}",
                    token.expiration_seconds.unwrap_or(3600)
                );
            } else if let Some(config_map) = &source.config_map {
                let _ = writeln!(
                    out,
                    "    ConfigMapOptional:       {}",
                    config_map.optional.unwrap_or(false)
                );
            } else if source.downward_api.is_some() {
                let _ = writeln!(out, "    DownwardAPI:             true");
            } else {
                out.push_str("    (Volume source not recognized)\n");
            }
        }
    } else {
        out.push_str("    (Volume source not recognized)\n");
    }
}

fn write_events(out: &mut String, events: &[Event], now: DateTime<Utc>) {
    if events.is_empty() {
        let _ = writeln!(out, "Events:       {}", NONE);
        return;
    }

    out.push_str("Events:\n");
    let _ = writeln!(
        out,
        "  {:<7} {:<12} {:<6} {:<18} {}",
        "Type", "Reason", "Age", "From", "Message"
    );
    let _ = writeln!(
        out,
        "  {:<7} {:<12} {:<6} {:<18} {}",
        "----", "------", "---", "----", "-------"
    );
    for event in events {
        let seen = event
            .last_timestamp
            .as_ref()
            .or(event.first_timestamp.as_ref())
            .map(|t| t.0);
        let _ = writeln!(
            out,
            "  {:<7} {:<12} {:<6} {:<18} {}",
            event.type_.as_deref().unwrap_or(""),
            event.reason.as_deref().unwrap_or(""),
            format_age(seen, now),
            event
                .source
                .as_ref()
                .and_then(|s| s.component.as_deref())
                .unwrap_or(""),
            event.message.as_deref().unwrap_or("").trim_end()
        );
    }
}
