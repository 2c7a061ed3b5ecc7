use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use glossa_client::ReviewClient;
use glossa_core::tasks::TaskWaitError;
use glossa_core::{
    ConfigStore, ConflictChoice, DecisionTransition, MutationCoordinator, MutationOutcome,
    PollError, ReviewConfig, UnitStore, ValidationGate, DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT,
};
use glossa_observability::{
    canonical_logs_dir_from_root, emit_event, init_process_logging, ObservabilityEvent, ProcessKind,
};
use glossa_server::{serve, AppState};
use glossa_types::{AsyncTask, CommitPayload, ConflictSnapshot, TextUnit, UnitStatus};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

const LOG_RETENTION_DAYS: u64 = 14;

#[derive(Parser, Debug)]
#[command(name = "glossa")]
#[command(about = "Review translation units against a Glossa server")]
struct Cli {
    /// Server base URL; overrides config files and GLOSSA_SERVER_URL.
    #[arg(long, global = true)]
    server_url: Option<String>,
    /// Project config file.
    #[arg(long, global = true, default_value = ".glossa/config.json")]
    config: String,
    /// Skip the translation check before content commits.
    #[arg(long, global = true, default_value_t = false)]
    no_check: bool,
    #[arg(long, global = true, env = "GLOSSA_STATE_DIR")]
    state_dir: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the reference review server.
    Serve {
        #[arg(long, alias = "host", default_value = DEFAULT_SERVER_HOST)]
        hostname: String,
        #[arg(long, default_value_t = DEFAULT_SERVER_PORT)]
        port: u16,
        /// JSON file with an array of units to preload.
        #[arg(long)]
        seed: Option<String>,
        #[arg(long, default_value_t = 1500)]
        job_delay_ms: u64,
    },
    Show {
        unit: String,
    },
    /// Save new content for a unit.
    Edit {
        unit: String,
        content: String,
        /// Also mark the unit as decided, in the same commit.
        #[arg(long, default_value_t = false)]
        decide: bool,
        /// Commit despite a failed check, and keep this edit on conflict.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// On conflict, decide the server's version instead of this edit.
        #[arg(long, default_value_t = false, conflicts_with = "force")]
        accept_theirs_and_decide: bool,
    },
    Status {
        unit: String,
        status: String,
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    Decide {
        unit: String,
        #[arg(long, default_value_t = false)]
        force: bool,
        #[arg(long, default_value_t = false, conflicts_with = "force")]
        accept_theirs_and_decide: bool,
    },
    Reopen {
        unit: String,
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Start a batch translation and wait for it; Ctrl-C stops waiting.
    Translate {
        #[arg(required = true)]
        units: Vec<String>,
    },
    CreateProject {
        name: String,
        #[arg(long)]
        source: String,
        #[arg(long = "target", required = true)]
        targets: Vec<String>,
    },
    Search {
        query: String,
    },
    /// Show config layers, or persist a server URL in the project file.
    Config {
        #[arg(long)]
        set_server: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let state_dir = resolve_state_dir(cli.state_dir.clone());
    let process = match cli.command {
        Command::Serve { .. } => ProcessKind::Server,
        _ => ProcessKind::Cli,
    };
    let logs_dir = canonical_logs_dir_from_root(&state_dir);
    let (_log_guard, log_info) = init_process_logging(process, &logs_dir, LOG_RETENTION_DAYS)?;
    let invocation_id = Uuid::new_v4().to_string();
    emit_event(
        tracing::Level::INFO,
        process,
        ObservabilityEvent {
            correlation_id: Some(&invocation_id),
            ..ObservabilityEvent::new("logging.initialized", "glossa.main")
        }
        .status("ok")
        .detail(&log_info.logs_dir),
    );

    let overrides = build_cli_overrides(cli.server_url.as_deref(), cli.no_check);
    let store = ConfigStore::new(&cli.config, overrides).await?;
    let config = store.get().await;

    match cli.command {
        Command::Serve {
            hostname,
            port,
            seed,
            job_delay_ms,
        } => {
            let units = Arc::new(UnitStore::new());
            if let Some(seed) = seed {
                let loaded = units.load_seed(Path::new(&seed)).await?;
                info!(count = loaded, seed = %seed, "glossa-server: seeded units");
            }
            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            let state = AppState::new(units).with_job_delay(Duration::from_millis(job_delay_ms));
            serve(addr, state).await?;
        }
        Command::Show { unit } => {
            let coordinator = build_coordinator(&config)?;
            let outcome = coordinator.load(&unit).await;
            let unit = settle(&coordinator, outcome, Resolution::default()).await?;
            println!("{}", describe_unit(&unit));
        }
        Command::Edit {
            unit,
            content,
            decide,
            force,
            accept_theirs_and_decide,
        } => {
            let coordinator = build_coordinator(&config)?;
            let outcome = if decide {
                coordinator.save_and_decide(&unit, &content).await
            } else {
                coordinator.save_content(&unit, &content).await
            };
            let resolution = Resolution {
                force,
                accept_theirs_and_decide,
            };
            let unit = settle(&coordinator, outcome, resolution).await?;
            println!("{}", describe_unit(&unit));
        }
        Command::Status {
            unit,
            status,
            force,
        } => {
            let status = parse_status(&status)?;
            let coordinator = build_coordinator(&config)?;
            let outcome = coordinator.change_status(&unit, status).await;
            let unit = settle(&coordinator, outcome, Resolution::forced(force)).await?;
            println!("{}", describe_unit(&unit));
        }
        Command::Decide {
            unit,
            force,
            accept_theirs_and_decide,
        } => {
            let coordinator = build_coordinator(&config)?;
            let outcome = coordinator
                .change_decision(&unit, DecisionTransition::Decide)
                .await;
            let resolution = Resolution {
                force,
                accept_theirs_and_decide,
            };
            let unit = settle(&coordinator, outcome, resolution).await?;
            println!("{}", describe_unit(&unit));
        }
        Command::Reopen { unit, force } => {
            let coordinator = build_coordinator(&config)?;
            let outcome = coordinator
                .change_decision(&unit, DecisionTransition::Reopen)
                .await;
            let unit = settle(&coordinator, outcome, Resolution::forced(force)).await?;
            println!("{}", describe_unit(&unit));
        }
        Command::Translate { units } => {
            let client = ReviewClient::from_config(&config)?;
            let task = client.start_batch_translation(units).await?;
            println!("batch translation started: task {}", task.id);
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });
            let result = client.wait_for_batch_translation(&task, Some(&cancel)).await;
            print_task_result(&task, result)?;
        }
        Command::CreateProject {
            name,
            source,
            targets,
        } => {
            let client = ReviewClient::from_config(&config)?;
            let task = client.start_project_creation(name, source, targets).await?;
            let result = client.wait_for_project_creation(&task).await;
            print_task_result(&task, result)?;
        }
        Command::Search { query } => {
            let client = ReviewClient::from_config(&config)?;
            let task = client.start_search(query).await?;
            let result = client.wait_for_search(&task).await;
            print_task_result(&task, result)?;
        }
        Command::Config { set_server } => {
            if let Some(url) = set_server {
                store
                    .patch_project(json!({ "server": { "base_url": url.trim() } }))
                    .await?;
                println!("saved server URL to {}", store.project_path().display());
            }
            let output = json!({
                "project_path": store.project_path().display().to_string(),
                "global_path": store.global_path().display().to_string(),
                "layers": store.get_layers_value().await,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn build_coordinator(config: &ReviewConfig) -> anyhow::Result<MutationCoordinator> {
    let client = Arc::new(ReviewClient::from_config(config)?);
    let gate = if config.validation.enabled {
        ValidationGate::new(client.clone())
    } else {
        ValidationGate::disabled()
    };
    Ok(MutationCoordinator::new(client, gate).with_commit_retry(config.commit_retry()))
}

/// How the reviewer asked for a stopped change to be carried on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Resolution {
    /// Commit past a failed check; keep the local change on conflict.
    force: bool,
    /// On conflict, commit a decision on the server's content.
    accept_theirs_and_decide: bool,
}

impl Resolution {
    fn forced(force: bool) -> Self {
        Self {
            force,
            ..Self::default()
        }
    }
}

/// Drives an outcome to a final unit. A second commit after a conflict only
/// happens when `resolution` names one; otherwise the server copy is adopted
/// and the run fails so the reviewer can choose.
async fn settle(
    coordinator: &MutationCoordinator,
    mut outcome: MutationOutcome,
    resolution: Resolution,
) -> anyhow::Result<TextUnit> {
    loop {
        outcome = match outcome {
            MutationOutcome::Committed(unit) | MutationOutcome::Adopted(unit) => return Ok(unit),
            MutationOutcome::NeedsConfirmation(pending) => {
                eprintln!("{}", pending.prompt());
                if !resolution.force {
                    anyhow::bail!("not committed; rerun with --force to commit anyway");
                }
                coordinator.confirm(pending).await
            }
            MutationOutcome::Conflict(pending) => {
                eprintln!("{}", conflict_report(pending.payload(), pending.snapshot()));
                let unit_id = pending.unit_id().to_string();
                if resolution.force {
                    eprintln!("keeping your version (--force)");
                    coordinator
                        .resolve_conflict(pending, ConflictChoice::UseMine)
                        .await
                } else if resolution.accept_theirs_and_decide {
                    eprintln!("deciding the server version (--accept-theirs-and-decide)");
                    let choice = ConflictChoice::UseExternal {
                        finalize_decision: true,
                    };
                    coordinator.resolve_conflict(pending, choice).await
                } else {
                    let choice = ConflictChoice::UseExternal {
                        finalize_decision: false,
                    };
                    let kept = coordinator.resolve_conflict(pending, choice).await;
                    if let Some(unit) = kept.unit() {
                        eprintln!("kept the server version\n{}", describe_unit(unit));
                    }
                    anyhow::bail!("not committed; unit {unit_id} changed on the server");
                }
            }
            MutationOutcome::Failed(failure) => {
                anyhow::bail!("{} ({})", failure, failure.code())
            }
            MutationOutcome::Superseded => {
                anyhow::bail!("a newer change to this unit took over")
            }
        }
    }
}

fn conflict_report(mine: &CommitPayload, server: &ConflictSnapshot) -> String {
    let mut lines = vec![format!(
        "unit {} was changed on the server since it was loaded",
        server.id
    )];
    lines.push(format!(
        "  server: {:?} [{} / {}]",
        server.content, server.status, server.decision_state
    ));
    let mine_content = mine.content.as_deref().unwrap_or(&server.content);
    let mine_status = mine.status.unwrap_or(server.status);
    lines.push(format!(
        "  yours:  {:?} [{} / {}]",
        mine_content, mine_status, mine.decision_state
    ));
    lines.push("  rerun with --force to keep yours".into());
    lines.push("  or with --accept-theirs-and-decide to decide the server version".into());
    lines.join("\n")
}

fn describe_unit(unit: &TextUnit) -> String {
    format!(
        "{id}\n  source:  {source}\n  content: {content}\n  \
         status:  {status} / {decision}\n  version: {token}",
        id = unit.id,
        source = unit.source,
        content = unit.content,
        status = unit.status,
        decision = unit.decision_state,
        token = unit.version_token,
    )
}

fn print_task_result(
    task: &AsyncTask,
    result: Result<AsyncTask, TaskWaitError>,
) -> anyhow::Result<()> {
    match result {
        Ok(done) => {
            let output = done.result.unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(TaskWaitError::Poll(PollError::Cancelled)) => {
            println!(
                "stopped waiting; {} task {} keeps running on the server",
                task.kind.as_str(),
                task.id
            );
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

fn parse_status(raw: &str) -> anyhow::Result<UnitStatus> {
    UnitStatus::parse(raw).ok_or_else(|| {
        anyhow::anyhow!(
            "unknown status `{raw}`. expected one of: \
             new, translated, needs_review, accepted, rejected"
        )
    })
}

fn build_cli_overrides(server_url: Option<&str>, no_check: bool) -> Option<Value> {
    let mut root = serde_json::Map::new();
    if let Some(url) = server_url.map(str::trim).filter(|url| !url.is_empty()) {
        root.insert(
            "server".to_string(),
            json!({ "base_url": url.trim_end_matches('/') }),
        );
    }
    if no_check {
        root.insert("validation".to_string(), json!({ "enabled": false }));
    }
    if root.is_empty() {
        return None;
    }
    Some(Value::Object(root))
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag.filter(|dir| !dir.trim().is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("glossa"))
        .unwrap_or_else(|| PathBuf::from(".glossa"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use async_trait::async_trait;
    use clap::CommandFactory;
    use glossa_core::{ApiError, CommitOutcome, ReviewBackend};
    use glossa_types::{DecisionState, VersionToken};

    /// Unit store that counts commits that reach it.
    #[derive(Default)]
    struct CountingStore {
        store: UnitStore,
        commits: AtomicUsize,
    }

    #[async_trait]
    impl ReviewBackend for CountingStore {
        async fn fetch_unit(&self, unit_id: &str) -> Result<TextUnit, ApiError> {
            self.store.fetch_unit(unit_id).await
        }

        async fn commit_unit(
            &self,
            unit_id: &str,
            payload: &CommitPayload,
            expected: &VersionToken,
            override_conflict: bool,
        ) -> Result<CommitOutcome, ApiError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            self.store
                .commit_unit(unit_id, payload, expected, override_conflict)
                .await
        }
    }

    /// Loads a pending unit, then lets another reviewer change it so the next
    /// decision conflicts.
    async fn conflicted_decision() -> (
        Arc<CountingStore>,
        MutationCoordinator,
        MutationOutcome,
    ) {
        let backend = Arc::new(CountingStore::default());
        let mut unit = TextUnit::new("greeting", "Hello");
        unit.content = "Bonjour".to_string();
        backend.store.insert(unit).await;
        let coordinator = MutationCoordinator::new(backend.clone(), ValidationGate::disabled());
        assert!(matches!(
            coordinator.load("greeting").await,
            MutationOutcome::Adopted(_)
        ));
        backend
            .store
            .apply_external(
                "greeting",
                &CommitPayload {
                    content: Some("Other reviewer text".to_string()),
                    status: None,
                    decision_state: DecisionState::Pending,
                },
            )
            .await
            .expect("external edit");
        let outcome = coordinator
            .change_decision("greeting", DecisionTransition::Decide)
            .await;
        assert!(matches!(outcome, MutationOutcome::Conflict(_)));
        (backend, coordinator, outcome)
    }

    #[tokio::test]
    async fn unresolved_conflict_adopts_server_copy_without_committing() {
        let (backend, coordinator, outcome) = conflicted_decision().await;
        let err = settle(&coordinator, outcome, Resolution::default())
            .await
            .expect_err("conflict needs a choice");
        assert!(err.to_string().contains("greeting"), "{err}");

        assert_eq!(backend.commits.load(Ordering::SeqCst), 1);
        let live = backend.store.get("greeting").await.expect("unit");
        assert_eq!(live.content, "Other reviewer text");
        assert_eq!(live.decision_state, DecisionState::Pending);
        let cached = coordinator.cached("greeting").expect("cached");
        assert_eq!(cached, live);
    }

    #[tokio::test]
    async fn accept_theirs_and_decide_finalizes_the_server_content() {
        let (backend, coordinator, outcome) = conflicted_decision().await;
        let resolution = Resolution {
            accept_theirs_and_decide: true,
            ..Resolution::default()
        };
        let unit = settle(&coordinator, outcome, resolution)
            .await
            .expect("decided");
        assert_eq!(unit.content, "Other reviewer text");
        assert_eq!(unit.decision_state, DecisionState::Decided);
        assert_eq!(backend.commits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn force_keeps_the_local_change() {
        let (backend, coordinator, outcome) = conflicted_decision().await;
        let unit = settle(&coordinator, outcome, Resolution::forced(true))
            .await
            .expect("overridden");
        assert_eq!(unit.decision_state, DecisionState::Decided);
        assert_eq!(backend.commits.load(Ordering::SeqCst), 2);
        assert_eq!(backend.store.get("greeting").await.expect("unit"), unit);
    }

    #[test]
    fn force_and_accept_theirs_are_exclusive() {
        let both = ["glossa", "decide", "greeting", "--force", "--accept-theirs-and-decide"];
        assert!(Cli::try_parse_from(both).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn edit_flags_parse() {
        let cli = Cli::try_parse_from([
            "glossa",
            "--server-url",
            "http://localhost:9000",
            "edit",
            "greeting",
            "Bonjour {name}",
            "--decide",
        ])
        .expect("parse");
        assert_eq!(cli.server_url.as_deref(), Some("http://localhost:9000"));
        match cli.command {
            Command::Edit {
                unit,
                content,
                decide,
                force,
                ..
            } => {
                assert_eq!(unit, "greeting");
                assert_eq!(content, "Bonjour {name}");
                assert!(decide);
                assert!(!force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn translate_requires_units() {
        assert!(Cli::try_parse_from(["glossa", "translate"]).is_err());
        let no_targets = ["glossa", "create-project", "Docs", "--source", "en"];
        assert!(Cli::try_parse_from(no_targets).is_err());
    }

    #[test]
    fn overrides_only_include_given_flags() {
        assert_eq!(build_cli_overrides(None, false), None);
        assert_eq!(build_cli_overrides(Some("  "), false), None);
        assert_eq!(
            build_cli_overrides(Some("http://host:1/"), true),
            Some(json!({
                "server": { "base_url": "http://host:1" },
                "validation": { "enabled": false },
            }))
        );
    }

    #[test]
    fn status_names_are_parsed() {
        assert_eq!(
            parse_status("needs-review").expect("status"),
            UnitStatus::NeedsReview
        );
        let err = parse_status("done").expect_err("unknown");
        assert!(err.to_string().contains("done"));
    }

    #[test]
    fn conflict_report_shows_both_versions() {
        let server = ConflictSnapshot {
            id: "greeting".to_string(),
            source: "Hello".to_string(),
            content: "Salut".to_string(),
            status: UnitStatus::Translated,
            decision_state: DecisionState::Pending,
            version_token: VersionToken::new("v2"),
        };
        let mine = CommitPayload {
            content: Some("Coucou".to_string()),
            status: None,
            decision_state: DecisionState::Decided,
        };
        let report = conflict_report(&mine, &server);
        assert!(report.contains("server: \"Salut\" [translated / pending]"));
        assert!(report.contains("yours:  \"Coucou\" [translated / decided]"));
        assert!(report.contains("--force"));
    }

    #[test]
    fn state_dir_flag_wins() {
        assert_eq!(
            resolve_state_dir(Some("/tmp/glossa-state".to_string())),
            PathBuf::from("/tmp/glossa-state")
        );
    }
}
