use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::{self, Config};
use crate::models::{NewTask, Priority, Task, TaskId, TaskStatus, TaskType, parse_tags};
use crate::notify::{LogScheduler, NoopScheduler, ReminderScheduler};
use crate::refresh::{RefreshTimer, apply_trigger};
use crate::storage::{load_snapshot, save_snapshot};
use crate::store::TaskStore;

/// 处理 CLI 命令
pub async fn handle_cli(args: &[String]) -> Result<()> {
    // 没有参数时列出所有任务
    if args.len() < 2 {
        let session = Session::open()?;
        return task_list(&session, &[]);
    }

    match args[1].as_str() {
        "task" => handle_task_command(&args[1..]),
        "type" => handle_type_command(&args[1..]),
        "overdue" => {
            let session = Session::open()?;
            print_tasks(&session.store, session.store.overdue_tasks());
            Ok(())
        }
        "upcoming" => {
            let session = Session::open()?;
            let days = match parse_flag(&args[2..], "--days") {
                Some(days) => parse_days(&days)?,
                None => session.config.upcoming_days,
            };
            print_tasks(&session.store, session.store.upcoming_tasks(days, Utc::now()));
            Ok(())
        }
        "refresh" => {
            let session = Session::open()?;
            // 加载时已经按当前时间刷新过状态，这里只需落盘
            session.save()?;
            println!("✓ Statuses refreshed ({} tasks)", session.store.len());
            Ok(())
        }
        "watch" => watch(Session::open()?).await,
        "config" => match args.get(2).map(|s| s.as_str()) {
            None | Some("show") => config::show_config(),
            Some("set") => {
                if args.len() < 5 {
                    anyhow::bail!("Usage: dtk config set <key> <value>");
                }
                config::set_config_value(&args[3], &args[4..].join(" "))
            }
            Some(other) => anyhow::bail!("Unknown config option: {}\nAvailable options: show, set", other),
        },
        "--help" | "-h" | "help" => {
            print_help();
            Ok(())
        }
        "--version" | "-V" | "-v" => {
            print_version();
            Ok(())
        }
        cmd => anyhow::bail!("Unknown command: {}\nRun 'dtk --help' for usage", cmd),
    }
}

/// 已加载的任务数据和配置
struct Session {
    config: Config,
    path: PathBuf,
    store: TaskStore,
}

impl Session {
    fn open() -> Result<Self> {
        let config = config::load_config()?;
        let path = config.data_path()?;
        let scheduler: Box<dyn ReminderScheduler> = if config.reminders {
            Box::new(LogScheduler)
        } else {
            Box::new(NoopScheduler)
        };
        let snapshot = load_snapshot(&path)?;
        let store = TaskStore::from_snapshot(snapshot, scheduler, Utc::now());
        Ok(Self { config, path, store })
    }

    fn save(&self) -> Result<()> {
        save_snapshot(&self.path, &self.store)
    }
}

// ============================================================================
// Task Commands
// ============================================================================

fn handle_task_command(args: &[String]) -> Result<()> {
    if args.len() < 2 {
        print_task_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "list" => task_list(&Session::open()?, &args[2..]),
        "add" => task_add(&mut Session::open()?, &args[2..]),
        "show" => {
            let session = Session::open()?;
            let id = resolve_task_id(&session.store, required_id(args, "show")?)?;
            task_show(&session.store, id)
        }
        "update" => {
            let mut session = Session::open()?;
            let id = resolve_task_id(&session.store, required_id(args, "update")?)?;
            task_update(&mut session, id, &args[3..])
        }
        "complete" => {
            let mut session = Session::open()?;
            let id = resolve_task_id(&session.store, required_id(args, "complete")?)?;
            if !session.store.complete(id, Utc::now())? {
                println!("Task {} is already completed", short(id));
                return Ok(());
            }
            session.save()?;
            println!("✓ Completed task {}", short(id));
            Ok(())
        }
        "revert" => {
            let mut session = Session::open()?;
            let id = resolve_task_id(&session.store, required_id(args, "revert")?)?;
            if !session.store.revert(id, Utc::now())? {
                println!("Task {} is not completed", short(id));
                return Ok(());
            }
            session.save()?;
            let status = session.store.get(id).map(|t| t.status()).unwrap_or(TaskStatus::Pending);
            println!("✓ Reopened task {} ({})", short(id), status);
            Ok(())
        }
        "delete" => {
            let mut session = Session::open()?;
            let id = resolve_task_id(&session.store, required_id(args, "delete")?)?;
            let task = session.store.delete(id)?;
            session.save()?;
            println!("✓ Deleted task {}: {}", short(id), task.title);
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_task_usage();
            Ok(())
        }
        cmd => anyhow::bail!("Unknown task command: {}\nRun 'dtk task help' for usage", cmd),
    }
}

fn print_task_usage() {
    println!("Task Commands

USAGE:
    dtk task <SUBCOMMAND>

SUBCOMMANDS:
    list [--status <status>] [--type <name>] [--tag <tag>]
        List tasks, highest priority first

    add --title <title> --due <when> [--desc <text>] [--priority <low|medium|high>]
        [--type <name>] [--tags <a,b>] [--remind <when>]
        Create a new task

    show <id>
        Show task details

    update <id> [--title <title>] [--desc <text>] [--due <when>] [--priority <p>]
        [--type <name>] [--tags <a,b>] [--remind <when|none>]
        Update task properties

    complete <id>     Mark a task as completed
    revert <id>       Reopen a completed task
    delete <id>       Delete a task

WHEN:
    2026-10-20T17:00:00+02:00   RFC 3339
    2026-10-20 17:00            local time
    2026-10-20                  end of that day (local)
    +30m, +3h, +2d, +1w         relative to now

EXAMPLES:
    dtk task add --title \"Pay rent\" --due +2d --priority high --type Personal
    dtk task list --status overdue
    dtk task update 3f2a --remind \"2026-10-19 09:00\"
    dtk task complete 3f2a");
}

fn task_list(session: &Session, args: &[String]) -> Result<()> {
    let store = &session.store;
    let mut tasks: Vec<&Task> = match parse_flag(args, "--status") {
        Some(status) => store.tasks_for_status(status.parse().map_err(anyhow::Error::msg)?),
        None => store.tasks().iter().collect(),
    };

    if let Some(name) = parse_flag(args, "--type") {
        let task_type = find_task_type(store, &name)?;
        tasks.retain(|t| t.task_type == task_type.id);
    }
    if let Some(tag) = parse_flag(args, "--tag") {
        tasks.retain(|t| t.tags.contains(&tag));
    }

    print_tasks(store, tasks);
    Ok(())
}

fn task_add(session: &mut Session, args: &[String]) -> Result<()> {
    let now = Utc::now();
    let title = parse_flag(args, "--title").context("Missing --title flag")?;
    let due = parse_flag(args, "--due").context("Missing --due flag")?;
    let due_date = parse_when(&due, now).map_err(anyhow::Error::msg)?;

    let task_type = match parse_flag(args, "--type") {
        Some(name) => find_task_type(&session.store, &name)?.id,
        None => session
            .store
            .task_types()
            .first()
            .map(|t| t.id)
            .context("No task types defined")?,
    };

    let mut draft = NewTask::new(title, due_date, task_type);
    if let Some(desc) = parse_flag(args, "--desc") {
        draft = draft.description(desc);
    }
    if let Some(priority) = parse_flag(args, "--priority") {
        draft = draft.priority(priority.parse::<Priority>().map_err(anyhow::Error::msg)?);
    }
    if let Some(tags) = parse_flag(args, "--tags") {
        draft.tags = parse_tags(&tags);
    }
    if let Some(remind) = parse_flag(args, "--remind") {
        draft = draft.reminder(parse_when(&remind, now).map_err(anyhow::Error::msg)?);
    }

    let task = session.store.add(draft, now)?;
    session.save()?;

    println!("✓ Added task {}: {}", task.short_id(), task.title);
    println!("  Due: {} ({})", format_local(task.due_date), task.status());
    Ok(())
}

fn task_show(store: &TaskStore, id: TaskId) -> Result<()> {
    let task = store.get(id).with_context(|| format!("Task {} not found", short(id)))?;
    let type_name = store
        .task_type(task.task_type)
        .map(|t| t.name.as_str())
        .unwrap_or("-");

    println!("Task {}", task.id());
    println!("Title: {}", task.title);
    println!("Status: {}", task.status());
    println!("Priority: {}", task.priority);
    println!("Type: {}", type_name);
    println!("Due: {}", format_local(task.due_date));
    println!("Tags: {}", join_tags(task));
    println!(
        "Reminder: {}",
        task.reminder_date.map(format_local).unwrap_or_else(|| "-".to_string())
    );
    if let Some(completed) = task.completed_date() {
        println!("Completed: {}", format_local(completed));
    }
    if !task.description.is_empty() {
        println!("\nDescription:");
        println!("{}", task.description);
    }

    Ok(())
}

fn task_update(session: &mut Session, id: TaskId, args: &[String]) -> Result<()> {
    let now = Utc::now();
    let mut task = session
        .store
        .get(id)
        .cloned()
        .with_context(|| format!("Task {} not found", short(id)))?;

    if let Some(title) = parse_flag(args, "--title") {
        task.title = title;
    }
    if let Some(desc) = parse_flag(args, "--desc") {
        task.description = desc;
    }
    if let Some(due) = parse_flag(args, "--due") {
        task.due_date = parse_when(&due, now).map_err(anyhow::Error::msg)?;
    }
    if let Some(priority) = parse_flag(args, "--priority") {
        task.priority = priority.parse().map_err(anyhow::Error::msg)?;
    }
    if let Some(name) = parse_flag(args, "--type") {
        task.task_type = find_task_type(&session.store, &name)?.id;
    }
    if let Some(tags) = parse_flag(args, "--tags") {
        task.tags = parse_tags(&tags);
    }
    if let Some(remind) = parse_flag(args, "--remind") {
        task.reminder_date = match remind.as_str() {
            "none" | "off" | "" => None,
            when => Some(parse_when(when, now).map_err(anyhow::Error::msg)?),
        };
    }

    session.store.update(task, now)?;
    session.save()?;
    println!("✓ Updated task {}", short(id));
    Ok(())
}

// ============================================================================
// Task Type Commands
// ============================================================================

fn handle_type_command(args: &[String]) -> Result<()> {
    match args.get(1).map(|s| s.as_str()) {
        None | Some("list") => {
            let session = Session::open()?;
            println!("NAME                ICON            COLOR       TASKS");
            println!("------------------  --------------  ----------  -----");
            for task_type in session.store.task_types() {
                println!(
                    "{:<18}  {:<14}  {:<10}  {}",
                    truncate(&task_type.name, 18),
                    truncate(&task_type.icon, 14),
                    truncate(&task_type.color, 10),
                    session.store.tasks_for_type(task_type.id).len()
                );
            }
            Ok(())
        }
        Some("add") => {
            let name = args
                .get(2)
                .filter(|name| !name.trim().is_empty())
                .context("Missing type name\nUsage: dtk type add <name> [--icon <icon>] [--color <color>]")?;
            let icon = parse_flag(&args[3..], "--icon").unwrap_or_else(|| "tag".to_string());
            let color = parse_flag(&args[3..], "--color").unwrap_or_else(|| "gray".to_string());

            let mut session = Session::open()?;
            if session.store.add_task_type(TaskType::new(name.trim(), icon, color)) {
                session.save()?;
                println!("✓ Added task type '{}'", name.trim());
            } else {
                println!("Task type '{}' already exists", name.trim());
            }
            Ok(())
        }
        Some(cmd) => anyhow::bail!("Unknown type command: {}\nAvailable: list, add", cmd),
    }
}

// ============================================================================
// Watch
// ============================================================================

/// 常驻运行：定时刷新状态，收到 SIGCONT 时也刷新，Ctrl-C 退出
async fn watch(mut session: Session) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(8);
    let timer = RefreshTimer::spawn(session.config.refresh_period(), tx.clone());
    #[cfg(unix)]
    let resume = crate::refresh::ResumeListener::spawn(tx)?;
    #[cfg(not(unix))]
    drop(tx);

    let mut events = session.store.subscribe();
    session.save()?;
    print_tasks(&session.store, session.store.tasks().iter().collect());
    println!(
        "\nWatching {} (refresh every {}s, Ctrl-C to stop)",
        session.path.display(),
        session.config.refresh_period().as_secs()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            trigger = rx.recv() => {
                let Some(trigger) = trigger else { break };
                if !apply_trigger(&mut session.store, trigger, Utc::now()) {
                    continue;
                }
                while let Ok(event) = events.try_recv() {
                    info!(?event, "store changed");
                }
                session.save()?;
                println!();
                print_tasks(&session.store, session.store.tasks().iter().collect());
            }
        }
    }

    timer.shutdown().await;
    #[cfg(unix)]
    resume.shutdown().await;
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn print_tasks(store: &TaskStore, tasks: Vec<&Task>) {
    if tasks.is_empty() {
        println!("No tasks found.");
        return;
    }

    println!("ID        TITLE                           PRIORITY  STATUS             DUE               TYPE        TAGS");
    println!("--------  ------------------------------  --------  -----------------  ----------------  ----------  --------");

    for task in tasks {
        let type_name = store
            .task_type(task.task_type)
            .map(|t| t.name.as_str())
            .unwrap_or("-");

        println!(
            "{:<8}  {:<30}  {:<8}  {:<17}  {:<16}  {:<10}  {}",
            task.short_id(),
            truncate(&task.title, 30),
            task.priority,
            task.status().display(),
            format_local(task.due_date),
            truncate(type_name, 10),
            truncate(&join_tags(task), 20)
        );
    }
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|s| s == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn required_id<'a>(args: &'a [String], command: &str) -> Result<&'a str> {
    args.get(2)
        .map(|s| s.as_str())
        .with_context(|| format!("Missing task id\nUsage: dtk task {} <id>", command))
}

/// 通过完整 UUID 或唯一前缀查找任务
fn resolve_task_id(store: &TaskStore, input: &str) -> Result<TaskId> {
    if let Ok(id) = input.parse::<TaskId>() {
        return Ok(id);
    }

    let prefix = input.trim().to_lowercase().replace('-', "");
    if prefix.is_empty() {
        anyhow::bail!("Task id must not be empty");
    }

    let matches: Vec<TaskId> = store
        .tasks()
        .iter()
        .map(|t| t.id())
        .filter(|id| id.simple().to_string().starts_with(&prefix))
        .collect();

    match matches.as_slice() {
        [id] => Ok(*id),
        [] => anyhow::bail!("No task matches id '{}'", input),
        _ => anyhow::bail!("Task id '{}' is ambiguous ({} matches)", input, matches.len()),
    }
}

fn find_task_type<'a>(store: &'a TaskStore, name: &str) -> Result<&'a TaskType> {
    store.task_type_by_name(name).with_context(|| {
        let known: Vec<&str> = store.task_types().iter().map(|t| t.name.as_str()).collect();
        format!("Unknown task type '{}' (known: {})", name, known.join(", "))
    })
}

/// Parse a user supplied point in time.
fn parse_when(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    let input = input.trim();

    if let Some(offset) = input.strip_prefix('+') {
        return parse_offset(offset).and_then(|d| {
            now.checked_add_signed(d)
                .ok_or_else(|| format!("Offset '+{}' is out of range", offset))
        });
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M"))
        .or_else(|_| {
            // 只给日期时取当天结束
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .map(|d| d.and_time(NaiveTime::from_hms_opt(23, 59, 0).unwrap_or_default()))
        })
        .map_err(|_| format!("Invalid date: '{}'", input))?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| format!("'{}' does not exist in the local time zone", input))
}

fn parse_offset(offset: &str) -> Result<Duration, String> {
    let split = offset
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("Missing unit in '+{}' (use m, h, d or w)", offset))?;
    let (amount, unit) = offset.split_at(split);
    let amount: i64 = amount
        .parse()
        .map_err(|_| format!("Invalid offset: '+{}'", offset))?;

    let duration = match unit {
        "m" | "min" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        "w" => Duration::try_weeks(amount),
        _ => return Err(format!("Unknown unit '{}' (use m, h, d or w)", unit)),
    };
    duration.ok_or_else(|| format!("Offset '+{}' is out of range", offset))
}

fn parse_days(input: &str) -> Result<i64> {
    let days: i64 = input
        .trim()
        .parse()
        .with_context(|| format!("Invalid number of days: {}", input))?;
    if days < 0 {
        anyhow::bail!("Number of days must not be negative");
    }
    Ok(days)
}

fn format_local(dt: DateTime<Utc>) -> String {
    dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn join_tags(task: &Task) -> String {
    if task.tags.is_empty() {
        "-".to_string()
    } else {
        task.tags.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

fn short(id: TaskId) -> String {
    id.simple().to_string()[..8].to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len - 3).collect::<String>())
    }
}

/// 打印帮助信息
fn print_help() {
    println!("duetask (dtk) - due-date driven task tracker\n");
    println!("USAGE:");
    println!("  dtk                      List all tasks");
    println!("  dtk <COMMAND> [ARGS]     Run a command");
    println!("  dtk --help               Show this help");
    println!("  dtk --version            Show version\n");

    println!("COMMANDS:");
    println!("  task                     Task management (dtk task help)");
    println!("  type list                List task types");
    println!("  type add <name>          Add a task type [--icon <icon>] [--color <color>]");
    println!("  overdue                  List overdue tasks");
    println!("  upcoming [--days N]      List open tasks due within N days");
    println!("  refresh                  Recompute statuses and save");
    println!("  watch                    Keep statuses fresh until Ctrl-C");
    println!("  config [show]            Show configuration");
    println!("  config set <key> <val>   Change a configuration value\n");

    println!("STATUSES:");
    for status in TaskStatus::ALL {
        println!("  {:<18} {}", status.name(), status.display());
    }
    println!();

    println!("LOGGING:");
    println!("  Set RUST_LOG=info to see reminder scheduling");
}

/// 打印版本信息
fn print_version() {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const NAME: &str = env!("CARGO_PKG_NAME");
    println!("{} {}", NAME, VERSION);
}
