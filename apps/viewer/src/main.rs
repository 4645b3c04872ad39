use std::{collections::HashSet, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use client_core::{
    config::load_settings_from, load_settings, FilterSelection, HttpQueryService, Outcome,
    QueryCoordinator, ViewEvent,
};
use shared::{
    domain::{EventKind, EventPayload, NormalizedEvent},
    error::QueryErrorKind,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Search, page through and follow the security event log")]
struct Args {
    #[arg(long)]
    server_url: Option<String>,
    /// Settings file; defaults to ./viewer.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long = "type", value_parser = parse_kind)]
    types: Vec<EventKind>,
    #[arg(long = "process")]
    processes: Vec<String>,
    #[arg(long = "pid")]
    pids: Vec<u32>,
    /// Only events from the last N minutes.
    #[arg(long)]
    since_minutes: Option<i64>,
    #[arg(long)]
    limit: Option<u32>,
    /// Number of pages to fetch before printing.
    #[arg(long, default_value_t = 1)]
    pages: u32,
    /// Keep running and print events as background refreshes pick them up.
    #[arg(long)]
    follow: bool,
    #[arg(long)]
    refresh_ms: Option<u64>,
    /// Print events as JSON lines.
    #[arg(long)]
    json: bool,
}

fn parse_kind(raw: &str) -> Result<EventKind, String> {
    match EventKind::from_wire(raw) {
        EventKind::Unknown => Err(format!("unknown event type '{raw}'")),
        kind => Ok(kind),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from(path)?,
        None => load_settings(),
    };
    if let Some(url) = &args.server_url {
        settings.server_url = url.clone();
    }
    if let Some(limit) = args.limit {
        settings.page_limit = limit;
    }
    if let Some(ms) = args.refresh_ms {
        settings.refresh_interval_ms = ms;
    }
    settings.validate()?;

    let service = HttpQueryService::new(&settings.server_url)?;
    info!("viewer: querying {}", service.endpoint());
    let coordinator = QueryCoordinator::from_settings(Arc::new(service), &settings);

    let now = Utc::now();
    coordinator
        .set_filters(FilterSelection {
            types: args.types.clone(),
            processes: args.processes.clone(),
            pids: args.pids.clone(),
            cgroup_ids: Vec::new(),
            time_window: args
                .since_minutes
                .map(|minutes| (now - chrono::Duration::minutes(minutes), now)),
        })
        .await;

    if let Err(err) = coordinator.search(None).await {
        if let Some(hint) = failure_hint(err.kind()) {
            warn!("viewer: {hint} ({})", settings.server_url);
        }
        return Err(err).context("initial search failed");
    }
    for _ in 1..args.pages.max(1) {
        match coordinator.load_more().await? {
            Outcome::Applied(summary) => {
                info!("viewer: loaded {} more events", summary.applied)
            }
            _ => break,
        }
    }

    let view = coordinator.snapshot().await;
    for event in view.events.iter().rev() {
        print_event(event, args.json)?;
    }
    info!(
        "viewer: {} events shown, total={} page={}/{} exec={} file={} connect={} more={}",
        view.events.len(),
        view.pagination.total,
        view.pagination.current_page,
        view.pagination.total_pages,
        view.type_counts.exec,
        view.type_counts.file,
        view.type_counts.connect,
        view.has_more
    );

    if args.follow {
        follow(&coordinator, settings.refresh_interval(), args.json).await?;
    }

    Ok(())
}

async fn follow(coordinator: &Arc<QueryCoordinator>, every: Duration, json: bool) -> Result<()> {
    let mut seen: HashSet<String> = coordinator
        .events()
        .await
        .into_iter()
        .map(|e| e.id)
        .collect();
    let mut updates = coordinator.subscribe();
    let refresher = coordinator.spawn_auto_refresh(every);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                Ok(ViewEvent::Merged(_)) => {
                    let events = coordinator.events().await;
                    for event in events.iter().rev().filter(|e| !seen.contains(&e.id)) {
                        print_event(event, json)?;
                    }
                    seen = events.into_iter().map(|e| e.id).collect();
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("viewer: skipped {skipped} view updates");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    refresher.abort();
    Ok(())
}

fn failure_hint(kind: QueryErrorKind) -> Option<&'static str> {
    match kind {
        QueryErrorKind::Transport => Some("event server unreachable"),
        QueryErrorKind::Decode => Some("event server answered with something other than a page"),
        QueryErrorKind::Protocol => None,
    }
}

fn print_event(event: &NormalizedEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!("{}", format_event(event));
    }
    Ok(())
}

fn format_event(event: &NormalizedEvent) -> String {
    let when = DateTime::<Utc>::from_timestamp_millis(event.timestamp())
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| event.timestamp().to_string());
    let detail = match &event.payload {
        EventPayload::Exec {
            parent_comm,
            command_line,
            ..
        } => format!("{command_line} (parent {parent_comm})"),
        EventPayload::File {
            filename, flags, ..
        } => format!("{filename} flags={flags:#x}"),
        EventPayload::Connect { addr, port, .. } => format!("{addr} port={port}"),
        EventPayload::Unknown => String::new(),
    };
    let blocked = if event.blocked { " [blocked]" } else { "" };
    format!(
        "{when} {:<7} pid={:<6} {:<16} {detail}{blocked}",
        event.kind().as_str(),
        event.header.pid,
        event.header.comm
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{domain::EventHeader, error::QueryError};

    #[test]
    fn parses_known_kinds_and_rejects_others() {
        assert_eq!(parse_kind("exec"), Ok(EventKind::Exec));
        assert_eq!(parse_kind("network"), Ok(EventKind::Connect));
        assert!(parse_kind("ptrace").is_err());
    }

    #[test]
    fn formats_blocked_file_event() {
        let event = NormalizedEvent {
            id: "x".into(),
            header: EventHeader {
                timestamp: 0,
                pid: 12,
                cgroup_id: String::new(),
                comm: "cat".into(),
                ppid: None,
            },
            blocked: true,
            payload: EventPayload::File {
                filename: "/etc/shadow".into(),
                flags: 2,
                ino: None,
                dev: None,
            },
        };
        let line = format_event(&event);
        assert!(line.starts_with("1970-01-01 00:00:00.000 file"));
        assert!(line.contains("pid=12"));
        assert!(line.contains("/etc/shadow flags=0x2"));
        assert!(line.ends_with("[blocked]"));
    }

    #[test]
    fn hints_only_for_non_http_failures() {
        assert!(failure_hint(QueryError::Transport("refused".into()).kind()).is_some());
        assert!(failure_hint(QueryError::Decode("eof".into()).kind()).is_some());
        assert_eq!(failure_hint(QueryError::Status(500).kind()), None);
    }

    #[test]
    fn cli_collects_repeated_filters() {
        let args = Args::parse_from([
            "viewer", "--type", "exec", "--type", "file", "--pid", "7", "--process", "sshd",
            "--pages", "3",
        ]);
        assert_eq!(args.types, vec![EventKind::Exec, EventKind::File]);
        assert_eq!(args.pids, vec![7]);
        assert_eq!(args.processes, vec!["sshd".to_string()]);
        assert_eq!(args.pages, 3);
        assert!(!args.follow);
    }
}
