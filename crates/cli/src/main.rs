use std::io::{Read, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use seishin_core::config::{self, AppConfig};
use seishin_core::model::{CutFilter, RecordId, Step, WorkType};
use seishin_core::run_log::{self, RunKind, RunLog};
use seishin_core::{
    APP_NAME, BackupConfig, BackupOptions, LocalDirBlobStore, ProgressSink, RestoreConfig,
    RestoreOptions, Store, confirm_restore, fetch_restore_with, remote_backup_info,
    run_backup_with,
};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "seishin")]
#[command(about = "Seishin CLI (local store, backup and restore)", long_about = None)]
struct Cli {
    #[arg(long)]
    json: bool,

    #[arg(long)]
    events: bool,

    #[arg(long)]
    config_dir: Option<PathBuf>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open the store and bring its schema up to date.
    Migrate,
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
    Passphrase {
        #[command(subcommand)]
        cmd: PassphraseCmd,
    },
    Backup {
        #[command(subcommand)]
        cmd: BackupCmd,
    },
    Restore {
        #[command(subcommand)]
        cmd: RestoreCmd,
    },
    Cuts {
        #[command(subcommand)]
        cmd: CutsCmd,
    },
    Studios {
        #[command(subcommand)]
        cmd: StudiosCmd,
    },
    Income {
        #[arg(long, default_value_t = 6)]
        months: u32,
    },
    Deadlines,
}

#[derive(Subcommand)]
enum ConfigCmd {
    Get { key: Option<String> },
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum PassphraseCmd {
    /// Read the passphrase from stdin and keep it in the store.
    Set,
    Status,
}

#[derive(Subcommand)]
enum BackupCmd {
    Run,
    Info,
}

#[derive(Subcommand)]
enum RestoreCmd {
    Preview {
        #[arg(long)]
        passphrase_stdin: bool,
    },
    Apply {
        #[arg(long)]
        passphrase_stdin: bool,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum CutsCmd {
    List {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        step: Option<Step>,
        #[arg(long)]
        studio_id: Option<RecordId>,
        #[arg(long)]
        work_type: Option<WorkType>,
    },
    Advance {
        id: RecordId,
        step: Step,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
enum StudiosCmd {
    List,
}

#[derive(Debug, Serialize)]
struct CliError {
    code: &'static str,
    message: String,
    details: serde_json::Value,
    retryable: bool,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: false,
        }
    }

    fn retryable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: true,
        }
    }
}

struct NdjsonProgressSink {
    task_id: String,
}

impl ProgressSink for NdjsonProgressSink {
    fn on_progress(&self, p: seishin_core::TaskProgress) {
        let line = serde_json::json!({
            "type": "task.progress",
            "taskId": self.task_id,
            "phase": p.phase,
            "records": p.records,
            "bytesUploaded": p.bytes_uploaded,
            "bytesDownloaded": p.bytes_downloaded,
        });
        println!("{line}");
    }
}

struct Dirs {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            emit_error(&e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_dir = cli
        .config_dir
        .or_else(|| std::env::var("SEISHIN_CONFIG_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(default_config_dir);
    let data_dir = cli
        .data_dir
        .or_else(|| std::env::var("SEISHIN_DATA_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(default_data_dir);
    let dirs = Dirs {
        config_dir,
        data_dir,
    };
    let json = cli.json;

    match cli.cmd {
        Command::Migrate => migrate(&dirs, json).await,
        Command::Config { cmd } => match cmd {
            ConfigCmd::Get { key } => config_get(&dirs, key.as_deref(), json),
            ConfigCmd::Set { key, value } => config_set(&dirs, &key, &value, json),
        },
        Command::Passphrase { cmd } => match cmd {
            PassphraseCmd::Set => passphrase_set(&dirs, json).await,
            PassphraseCmd::Status => passphrase_status(&dirs, json).await,
        },
        Command::Backup { cmd } => match cmd {
            BackupCmd::Run => backup_run(&dirs, json, cli.events).await,
            BackupCmd::Info => backup_info(&dirs, json).await,
        },
        Command::Restore { cmd } => match cmd {
            RestoreCmd::Preview { passphrase_stdin } => {
                restore_preview(&dirs, passphrase_stdin, json, cli.events).await
            }
            RestoreCmd::Apply {
                passphrase_stdin,
                yes,
            } => restore_apply(&dirs, passphrase_stdin, yes, json, cli.events).await,
        },
        Command::Cuts { cmd } => match cmd {
            CutsCmd::List {
                project,
                step,
                studio_id,
                work_type,
            } => {
                let filter = CutFilter {
                    project_name: project,
                    step,
                    studio_id,
                    work_type,
                };
                cuts_list(&dirs, &filter, json).await
            }
            CutsCmd::Advance { id, step, reason } => {
                cuts_advance(&dirs, id, step, reason.as_deref(), json).await
            }
        },
        Command::Studios { cmd } => match cmd {
            StudiosCmd::List => studios_list(&dirs, json).await,
        },
        Command::Income { months } => income(&dirs, months, json).await,
        Command::Deadlines => deadlines(&dirs, json).await,
    }
}

async fn open_store(dirs: &Dirs, config: &AppConfig) -> Result<Store, CliError> {
    std::fs::create_dir_all(&dirs.data_dir)
        .map_err(|e| CliError::new("io.failed", e.to_string()))?;
    Store::open(&config.db_path(&dirs.data_dir))
        .await
        .map_err(map_core_err)
}

fn remote_for(dirs: &Dirs, config: &AppConfig) -> Result<LocalDirBlobStore, CliError> {
    let dir = config.remote_dir(&dirs.data_dir);
    // Only the default location is created on demand; a configured directory
    // that is missing reads as a signed-out remote.
    if config.remote.dir.is_none() {
        std::fs::create_dir_all(&dir).map_err(|e| CliError::new("io.failed", e.to_string()))?;
    }
    tracing::debug!(
        event = "remote.open",
        kind = %config.remote.kind,
        dir = %dir.display(),
        "remote.open"
    );
    Ok(LocalDirBlobStore::new(dir))
}

fn load_config(dirs: &Dirs) -> Result<AppConfig, CliError> {
    config::load_config(&dirs.config_dir).map_err(map_core_err)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let text =
        serde_json::to_string(value).map_err(|e| CliError::new("json.failed", e.to_string()))?;
    println!("{text}");
    Ok(())
}

fn read_stdin_trimmed() -> Result<String, CliError> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| CliError::new("io.failed", e.to_string()))?;
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}

fn new_task_id() -> String {
    format!("tsk_{}", uuid::Uuid::new_v4())
}

fn start_log(kind: RunKind, dirs: &Dirs) -> Result<RunLog, CliError> {
    std::fs::create_dir_all(&dirs.data_dir)
        .map_err(|e| CliError::new("io.failed", e.to_string()))?;
    run_log::start_run_log(kind, &new_task_id(), &dirs.data_dir)
        .map_err(|e| CliError::new("log.failed", e.to_string()))
}

fn emit_task_state(task_id: &str, kind: &str, state: &str) {
    println!(
        "{}",
        serde_json::json!({
            "type": "task.state",
            "taskId": task_id,
            "kind": kind,
            "state": state,
        })
    );
}

async fn migrate(dirs: &Dirs, json: bool) -> Result<(), CliError> {
    let config = load_config(dirs)?;
    let log = start_log(RunKind::Migrate, dirs)?;
    let opened = Store::open(&config.db_path(&dirs.data_dir)).await;
    log.finish(&opened);
    let store = opened.map_err(map_core_err)?;
    let report = store.migration().clone();
    store.close().await;

    if json {
        print_json(&report)?;
    } else {
        println!(
            "fromVersion={} toVersion={} rowsTransformed={}",
            report.from_version, report.to_version, report.rows_transformed
        );
        let applied: Vec<String> = report.applied.iter().map(|v| v.to_string()).collect();
        println!("applied={}", applied.join(","));
    }
    Ok(())
}

fn config_get(dirs: &Dirs, key: Option<&str>, json: bool) -> Result<(), CliError> {
    let config = load_config(dirs)?;
    match key {
        Some(key) => {
            let value = config::get_key(&config, key).map_err(map_core_err)?;
            if json {
                println!("{}", serde_json::json!({ "key": key, "value": value }));
            } else {
                println!("{}", value.unwrap_or_default());
            }
        }
        None => {
            if json {
                println!("{}", serde_json::json!({ "config": config }));
            } else {
                let text = config::to_toml(&config).map_err(map_core_err)?;
                print!("{text}");
                if !text.ends_with('\n') {
                    println!();
                }
            }
        }
    }
    Ok(())
}

fn config_set(dirs: &Dirs, key: &str, value: &str, json: bool) -> Result<(), CliError> {
    let mut config = load_config(dirs)?;
    config::set_key(&mut config, key, value).map_err(map_core_err)?;
    config::save_config(&dirs.config_dir, &config).map_err(map_core_err)?;

    if json {
        println!("{}", serde_json::json!({ "config": config }));
    } else {
        println!("ok");
    }
    Ok(())
}

async fn passphrase_set(dirs: &Dirs, json: bool) -> Result<(), CliError> {
    let passphrase = read_stdin_trimmed()?;
    if passphrase.is_empty() {
        return Err(CliError::new("passphrase.missing", "passphrase is empty"));
    }
    let config = load_config(dirs)?;
    let store = open_store(dirs, &config).await?;
    let res = store.save_passphrase(&passphrase).await;
    store.close().await;
    res.map_err(map_core_err)?;

    if json {
        println!("{}", serde_json::json!({ "ok": true }));
    } else {
        println!("ok");
    }
    Ok(())
}

async fn passphrase_status(dirs: &Dirs, json: bool) -> Result<(), CliError> {
    let config = load_config(dirs)?;
    let store = open_store(dirs, &config).await?;
    let res = store.saved_passphrase().await;
    store.close().await;
    let present = res.map_err(map_core_err)?.is_some();

    if json {
        println!("{}", serde_json::json!({ "passphrasePresent": present }));
    } else {
        println!("passphrasePresent={present}");
    }
    Ok(())
}

async fn backup_run(dirs: &Dirs, json: bool, events: bool) -> Result<(), CliError> {
    let config = load_config(dirs)?;
    let log = start_log(RunKind::Backup, dirs)?;
    let remote = remote_for(dirs, &config)?;
    let task_id = log.run_id().to_string();

    let store = open_store(dirs, &config).await?;
    let passphrase = match store.saved_passphrase().await {
        Ok(p) => p.unwrap_or_default(),
        Err(e) => {
            store.close().await;
            return Err(map_core_err(e));
        }
    };

    if events {
        emit_task_state(&task_id, "backup", "running");
    }
    let sink = NdjsonProgressSink {
        task_id: task_id.clone(),
    };
    let opts = BackupOptions {
        cancel: None,
        progress: if events { Some(&sink) } else { None },
    };
    let res = run_backup_with(
        &store,
        &remote,
        BackupConfig::new(passphrase),
        opts,
    )
    .await;
    store.close().await;
    log.finish(&res);
    let res = res.map_err(map_core_err)?;

    if events {
        emit_task_state(&task_id, "backup", "succeeded");
        return Ok(());
    }
    if json {
        print_json(&res)?;
    } else {
        println!("handle={} createdAt={}", res.handle, res.created_at.to_rfc3339());
        println!(
            "records={} bytesUploaded={}",
            res.counts.total(),
            res.bytes_uploaded
        );
    }
    Ok(())
}

async fn backup_info(dirs: &Dirs, json: bool) -> Result<(), CliError> {
    let config = load_config(dirs)?;
    let remote = remote_for(dirs, &config)?;
    let info = remote_backup_info(&remote).await.map_err(map_core_err)?;

    if json {
        println!("{}", serde_json::json!({ "backup": info }));
    } else {
        match info {
            Some(info) => println!(
                "modifiedAt={} size={}",
                info.modified_at.to_rfc3339(),
                info.size
            ),
            None => println!("no backup"),
        }
    }
    Ok(())
}

async fn restore_passphrase(
    dirs: &Dirs,
    config: &AppConfig,
    from_stdin: bool,
) -> Result<String, CliError> {
    if from_stdin {
        return read_stdin_trimmed();
    }
    let store = open_store(dirs, config).await?;
    let res = store.saved_passphrase().await;
    store.close().await;
    Ok(res.map_err(map_core_err)?.unwrap_or_default())
}

async fn restore_preview(
    dirs: &Dirs,
    passphrase_stdin: bool,
    json: bool,
    events: bool,
) -> Result<(), CliError> {
    let config = load_config(dirs)?;
    let remote = remote_for(dirs, &config)?;
    let passphrase = restore_passphrase(dirs, &config, passphrase_stdin).await?;

    let task_id = new_task_id();
    let sink = NdjsonProgressSink { task_id };
    let preview = fetch_restore_with(
        &remote,
        RestoreConfig::new(passphrase),
        RestoreOptions {
            cancel: None,
            progress: if events { Some(&sink) } else { None },
        },
    )
    .await
    .map_err(map_core_err)?;

    if json {
        print_json(&preview)?;
    } else {
        println!(
            "version={} exportedAt={}",
            preview.version,
            preview.exported_at.to_rfc3339()
        );
        let c = preview.counts;
        println!(
            "studios={} cuts={} retakeHistory={} quickLinks={} settings={}",
            c.studios, c.cuts, c.retake_history, c.quick_links, c.settings
        );
    }
    Ok(())
}

async fn restore_apply(
    dirs: &Dirs,
    passphrase_stdin: bool,
    yes: bool,
    json: bool,
    events: bool,
) -> Result<(), CliError> {
    if !yes {
        return Err(CliError::new(
            "restore.unconfirmed",
            "restore replaces all local data; pass --yes to confirm",
        ));
    }
    let config = load_config(dirs)?;
    let passphrase = restore_passphrase(dirs, &config, passphrase_stdin).await?;

    let log = start_log(RunKind::Restore, dirs)?;
    let remote = remote_for(dirs, &config)?;
    let task_id = log.run_id().to_string();
    if events {
        emit_task_state(&task_id, "restore", "running");
    }

    let sink = NdjsonProgressSink {
        task_id: task_id.clone(),
    };
    let store = open_store(dirs, &config).await?;
    let res = async {
        let preview = fetch_restore_with(
            &remote,
            RestoreConfig::new(passphrase),
            RestoreOptions {
                cancel: None,
                progress: if events { Some(&sink) } else { None },
            },
        )
        .await?;
        confirm_restore(&store, preview).await
    }
    .await;
    store.close().await;
    log.finish(&res);
    let res = res.map_err(map_core_err)?;

    if events {
        emit_task_state(&task_id, "restore", "succeeded");
        return Ok(());
    }
    if json {
        print_json(&res)?;
    } else {
        println!(
            "exportedAt={} records={}",
            res.exported_at.to_rfc3339(),
            res.counts.total()
        );
    }
    Ok(())
}

async fn cuts_list(dirs: &Dirs, filter: &CutFilter, json: bool) -> Result<(), CliError> {
    let config = load_config(dirs)?;
    let store = open_store(dirs, &config).await?;
    let res = store.list_cuts(filter).await;
    store.close().await;
    let cuts = res.map_err(map_core_err)?;

    if json {
        println!("{}", serde_json::json!({ "cuts": cuts }));
    } else {
        for c in cuts {
            println!(
                "{}\t{}\t#{}\t{}\t{}\t{}",
                c.id,
                c.project_name,
                c.episode_number,
                c.cut_number,
                c.step,
                c.deadline.map(|d| d.to_string()).unwrap_or_default()
            );
        }
    }
    Ok(())
}

async fn cuts_advance(
    dirs: &Dirs,
    id: RecordId,
    step: Step,
    reason: Option<&str>,
    json: bool,
) -> Result<(), CliError> {
    let config = load_config(dirs)?;
    let store = open_store(dirs, &config).await?;
    let res = store.advance_cut_step(id, step, reason).await;
    store.close().await;
    let cut = res.map_err(map_core_err)?;

    if json {
        println!("{}", serde_json::json!({ "cut": cut }));
    } else {
        println!("id={} step={} retakeCount={}", cut.id, cut.step, cut.retake_count);
    }
    Ok(())
}

async fn studios_list(dirs: &Dirs, json: bool) -> Result<(), CliError> {
    let config = load_config(dirs)?;
    let store = open_store(dirs, &config).await?;
    let res = store.studios_with_stats().await;
    store.close().await;
    let stats = res.map_err(map_core_err)?;

    if json {
        println!("{}", serde_json::json!({ "studios": stats }));
    } else {
        for s in stats {
            println!(
                "{}\t{}\tcuts={}\tretakes={}\tretakeRate={:.2}",
                s.studio.id, s.studio.name, s.total_cuts, s.total_retakes, s.retake_rate
            );
        }
    }
    Ok(())
}

async fn income(dirs: &Dirs, months: u32, json: bool) -> Result<(), CliError> {
    let config = load_config(dirs)?;
    let store = open_store(dirs, &config).await?;
    let now = chrono::Utc::now();
    let res = async {
        let summary = store.income_summary(now).await?;
        let history = store.income_history(months, now).await?;
        Ok::<_, seishin_core::Error>((summary, history))
    }
    .await;
    store.close().await;
    let (summary, history) = res.map_err(map_core_err)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "summary": summary, "history": history })
        );
    } else {
        println!(
            "earned={} target={} remaining={} dailyQuota={:.1} businessDaysLeft={}",
            summary.earned,
            summary.monthly_target,
            summary.remaining,
            summary.daily_quota,
            summary.remaining_business_days
        );
        for m in history {
            println!("{}-{:02}\t{}\tcuts={}", m.year, m.month, m.earned, m.cut_count);
        }
    }
    Ok(())
}

async fn deadlines(dirs: &Dirs, json: bool) -> Result<(), CliError> {
    let config = load_config(dirs)?;
    let store = open_store(dirs, &config).await?;
    let today = chrono::Local::now().date_naive();
    let res = store.deadline_groups(today).await;
    store.close().await;
    let groups = res.map_err(map_core_err)?;

    if json {
        println!("{}", serde_json::json!({ "groups": groups }));
    } else {
        for g in groups {
            let bucket = serde_json::to_value(g.bucket)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            for c in g.cuts {
                let due = c.deadline.map(|d| d.to_string()).unwrap_or_default();
                println!("{bucket}\t{}\t{}\t{}\t{due}", c.id, c.project_name, c.cut_number);
            }
        }
    }
    Ok(())
}

#[cfg(target_os = "macos")]
fn default_config_dir() -> PathBuf {
    home_dir()
        .join("Library")
        .join("Application Support")
        .join(APP_NAME)
}

#[cfg(not(target_os = "macos"))]
fn default_config_dir() -> PathBuf {
    home_dir().join(".config").join(APP_NAME.to_lowercase())
}

#[cfg(target_os = "macos")]
fn default_data_dir() -> PathBuf {
    default_config_dir()
}

#[cfg(not(target_os = "macos"))]
fn default_data_dir() -> PathBuf {
    home_dir()
        .join(".local")
        .join("share")
        .join(APP_NAME.to_lowercase())
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

fn map_core_err(e: seishin_core::Error) -> CliError {
    use seishin_core::Error;

    let user_message = e.user_message();
    let mut out = match e {
        Error::InvalidConfig { message } => CliError::new("config.invalid", message),
        Error::Migration { from, to, message } => {
            let mut err = CliError::new("db.migration_failed", message);
            err.details = serde_json::json!({ "fromVersion": from, "toVersion": to });
            err
        }
        Error::Corrupt { message } => CliError::new("db.corrupt", message),
        Error::Sqlite(e) => CliError::new("db.failed", e.to_string()),
        Error::NotFound { entity, id } => {
            let mut err = CliError::new("record.not_found", format!("{entity} not found: {id}"));
            err.details = serde_json::json!({ "entity": entity, "id": id });
            err
        }
        Error::InvalidTransition { from, to } => CliError::new(
            "cut.invalid_transition",
            format!("invalid step transition: {from} -> {to}"),
        ),
        Error::Decryption => CliError::new("backup.decryption_failed", "decryption failed"),
        Error::Validation { message } => CliError::new("backup.invalid", message),
        Error::Transport { provider, message } => {
            let mut err = CliError::retryable("remote.unavailable", message);
            err.details = serde_json::json!({ "provider": provider });
            err
        }
        Error::RemoteBlobMissing => CliError::new("remote.not_found", "remote backup not found"),
        Error::Unauthenticated => {
            CliError::new("remote.unauthenticated", "remote session is not authenticated")
        }
        Error::MissingPassphrase => {
            CliError::new("passphrase.missing", "backup passphrase is empty")
        }
        Error::Cancelled => CliError::retryable("task.cancelled", "cancelled"),
        Error::Io(e) => CliError::retryable("io.failed", e.to_string()),
        other => CliError::new("unknown", other.to_string()),
    };
    if let Some(d) = out.details.as_object_mut() {
        d.insert("userMessage".to_string(), user_message.into());
    }
    out
}

fn emit_error(e: &CliError) {
    let json = serde_json::to_string(e).unwrap_or_else(|_| "{\"code\":\"unknown\",\"message\":\"json encode failed\",\"details\":{},\"retryable\":false}".to_string());
    let _ = writeln!(std::io::stderr(), "{json}");
}
