use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::io::{self, BufRead};
use std::sync::Arc;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use time::macros::format_description;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use zenith_cli::cli::{Cli, Command, collect_overrides};
use zenith_core::config::{
    Config, Palette, load_config_with_fallback, merge_overrides, palette_for_theme,
};
use zenith_core::error::AppError;
use zenith_core::filters::{View, ViewSplit, local_offset};
use zenith_core::identity::{AuthClient, Identity, LocalIdentity, Session};
use zenith_core::model::{Priority, Tag, Task, parse_due_date};
use zenith_core::remote::{RemoteStore, RestStore};
use zenith_core::storage::json_store::{self, JsonFileStore};
use zenith_core::storage::session_store;
use zenith_core::sync::{AddOptions, TaskSynchronizer};

const LOG_ENV_VAR: &str = "ZENITH_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    OneShot,
    Interactive,
}

struct App {
    identity: Arc<dyn Identity>,
    sync: TaskSynchronizer,
    palette: Palette,
}

impl App {
    fn build(config: &Config) -> Result<Self, AppError> {
        let (identity, store): (Arc<dyn Identity>, Arc<dyn RemoteStore>) = match config.backend()
        {
            Some((url, key)) => {
                let auth = AuthClient::new(url, key, session_store::session_path()?)?;
                let store: Arc<dyn RemoteStore> =
                    Arc::new(RestStore::new(url, key, auth.subscribe())?);
                let identity: Arc<dyn Identity> = Arc::new(auth);
                (identity, store)
            }
            None => {
                let store: Arc<dyn RemoteStore> =
                    Arc::new(JsonFileStore::new(json_store::store_path()?));
                let identity: Arc<dyn Identity> = Arc::new(LocalIdentity::new());
                (identity, store)
            }
        };

        Ok(Self {
            identity,
            sync: TaskSynchronizer::new(store).with_recovery(config.recovery),
            palette: palette_for_theme(config.theme.as_deref()),
        })
    }

    async fn require_session(&self) -> Result<Session, AppError> {
        self.identity.current_session().await?.ok_or_else(|| {
            AppError::unauthenticated("not signed in; run `zenith login <email> <password>`")
        })
    }

    /// Loads the signed-in user's list, or empties it when nobody is signed in.
    async fn refresh(&self) -> Result<(), AppError> {
        match self.identity.current_session().await? {
            Some(_) => self.sync.load().await,
            None => {
                self.sync.reset();
                Ok(())
            }
        }
    }
}

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Status")]
    status: &'static str,
    #[tabled(rename = "Priority")]
    priority: &'static str,
    #[tabled(rename = "Tag")]
    tag: &'static str,
    #[tabled(rename = "Due")]
    due: String,
}

fn due_label(task: &Task) -> String {
    task.due_date
        .and_then(|due| {
            due.to_offset(local_offset())
                .format(format_description!("[year]-[month]-[day]"))
                .ok()
        })
        .unwrap_or_else(|| "-".to_string())
}

fn task_row(task: &Task, palette: &Palette) -> TaskRow {
    let title = if task.is_done() {
        palette.mutedize(&task.title)
    } else if task.is_important() {
        palette.accentize(&task.title)
    } else {
        task.title.clone()
    };

    TaskRow {
        id: task.id.clone(),
        title,
        status: task.status.label(),
        priority: task.priority.label(),
        tag: task.tag.map(Tag::label).unwrap_or("-"),
        due: due_label(task),
    }
}

fn print_section(heading: &str, tasks: &[&Task], palette: &Palette) {
    println!("{heading} ({})", tasks.len());
    if tasks.is_empty() {
        return;
    }
    let rows: Vec<TaskRow> = tasks.iter().map(|task| task_row(task, palette)).collect();
    let mut table = Table::new(rows);
    table.with(Style::psql());
    println!("{table}");
}

fn print_view_plain(view: &View, split: &ViewSplit<'_>, palette: &Palette) {
    println!("{}", palette.accentize(&view.title()));
    if split.is_empty() {
        println!("No tasks");
        return;
    }
    print_section("Active", &split.active, palette);
    print_section("Completed", &split.completed, palette);
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, AppError> {
    serde_json::to_value(value).map_err(|err| AppError::invalid_data(err.to_string()))
}

fn print_view_json(view: &View, split: &ViewSplit<'_>) -> Result<(), AppError> {
    let payload = serde_json::json!({
        "view": view.title(),
        "active": to_json(&split.active)?,
        "completed": to_json(&split.completed)?,
    });
    println!("{payload}");
    Ok(())
}

fn print_task_json(task: &Task) -> Result<(), AppError> {
    println!("{}", to_json(task)?);
    Ok(())
}

fn print_session(session: Option<&Session>, json: bool) {
    if json {
        let payload = session.map(|session| {
            serde_json::json!({
                "user_id": session.user_id,
                "email": session.email,
            })
        });
        println!("{}", serde_json::json!({ "session": payload }));
        return;
    }

    match session {
        Some(session) => println!(
            "Signed in as {}",
            session.email.as_deref().unwrap_or(&session.user_id)
        ),
        None => println!("Not signed in"),
    }
}

fn normalize_parse_error(err: clap::Error) -> AppError {
    let rendered = err.to_string();
    let first_line = rendered.lines().next().unwrap_or("invalid command").trim();
    let message = first_line
        .strip_prefix("error: ")
        .unwrap_or(first_line)
        .to_string();
    AppError::invalid_input(message)
}

fn split_command_line(line: &str) -> Result<Vec<String>, AppError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escape = false;

    for ch in line.chars() {
        if escape {
            if ch != '"' && ch != '\\' {
                current.push('\\');
            }
            current.push(ch);
            escape = false;
            continue;
        }

        if in_quotes && ch == '\\' {
            escape = true;
            continue;
        }

        if ch == '"' {
            in_quotes = !in_quotes;
            continue;
        }

        if ch.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                args.push(std::mem::take(&mut current));
            }
            continue;
        }

        current.push(ch);
    }

    if in_quotes {
        return Err(AppError::invalid_input("unterminated quote in command"));
    }

    if !current.is_empty() {
        args.push(current);
    }

    Ok(args)
}

fn print_help() {
    let mut cmd = Cli::command();
    let help = cmd.render_help();
    println!("{help}");
}

async fn run_command(app: &App, cli: Cli, mode: Mode) -> Result<(), AppError> {
    match cli.command {
        Command::Login { email, password } => {
            let session = app.identity.sign_in(&email, &password).await?;
            app.sync.reset();
            print_session(Some(&session), cli.json);
        }
        Command::Logout => {
            app.identity.sign_out().await?;
            app.sync.reset();
            print_session(None, cli.json);
        }
        Command::Whoami => {
            let session = app.identity.current_session().await?;
            print_session(session.as_ref(), cli.json);
        }
        Command::Add {
            title,
            due,
            tag,
            priority,
        } => {
            let options = AddOptions {
                due_date: due
                    .as_deref()
                    .map(|raw| parse_due_date(raw, local_offset()))
                    .transpose()?,
                tag: tag.as_deref().map(Tag::parse).transpose()?,
                priority: priority.as_deref().map(Priority::parse).transpose()?,
            };

            let task = app.sync.add(title.as_deref().unwrap_or(""), options).await?;
            if cli.json {
                print_task_json(&task)?;
            } else {
                println!("Added task: {} ({})", task.title, task.id);
            }
        }
        Command::List { view } => {
            let view = match view {
                Some(list) => list.view().map_err(AppError::invalid_input)?,
                None => View::All,
            };
            let tasks = app.sync.tasks();
            let split = ViewSplit::of(&view, &tasks);
            if cli.json {
                print_view_json(&view, &split)?;
            } else {
                print_view_plain(&view, &split, &app.palette);
            }
        }
        Command::Done { id } => {
            let task = app.sync.toggle_status(&id).await?;
            if cli.json {
                print_task_json(&task)?;
            } else if task.is_done() {
                println!("Completed task: {} ({})", task.title, task.id);
            } else {
                println!("Reopened task: {} ({})", task.title, task.id);
            }
        }
        Command::Star { id } => {
            let task = app.sync.toggle_priority(&id).await?;
            if cli.json {
                print_task_json(&task)?;
            } else if task.is_important() {
                println!("Starred task: {} ({})", task.title, task.id);
            } else {
                println!("Unstarred task: {} ({})", task.title, task.id);
            }
        }
        Command::Edit { id, new_title } => match app.sync.rename_task(&id, &new_title).await? {
            Some(task) if cli.json => print_task_json(&task)?,
            Some(task) => println!("Updated task: {} ({})", task.title, task.id),
            None if cli.json => println!("null"),
            None => println!("Title unchanged: new title is blank"),
        },
        Command::Delete { id } => {
            let task = app.sync.delete_task(&id).await?;
            if cli.json {
                print_task_json(&task)?;
            } else {
                println!("Deleted task: {} ({})", task.title, task.id);
            }
        }
        Command::Move { active_id, over_id } => {
            if mode == Mode::OneShot {
                return Err(AppError::invalid_input(
                    "move only applies inside an interactive session",
                ));
            }
            let moved = app.sync.move_task(&active_id, &over_id);
            if cli.json {
                println!("{}", serde_json::json!({ "moved": moved }));
            } else if moved {
                println!("Moved task {active_id} to the position of {over_id}");
            } else {
                println!("Nothing moved");
            }
        }
    }

    Ok(())
}

fn load_config(raw_overrides: &[String]) -> Result<Config, AppError> {
    let overrides = collect_overrides(raw_overrides).map_err(AppError::invalid_input)?;
    let loaded = load_config_with_fallback();
    if let Some(err) = loaded.error {
        warn!(error = %err, "ignoring unreadable config");
    }
    Ok(merge_overrides(&loaded.config, &overrides))
}

async fn run_one_shot(cli: Cli) -> Result<(), AppError> {
    let app = App::build(&load_config(&cli.config_override)?)?;
    if cli.command.needs_tasks() {
        app.require_session().await?;
        app.sync.load().await?;
    }
    run_command(&app, cli, Mode::OneShot).await
}

/// One synchronizer lives for the whole session, so optimistic state and
/// local ordering carry over from line to line.
async fn run_interactive() -> Result<(), AppError> {
    let app = App::build(&load_config(&[])?)?;
    if let Err(err) = app.refresh().await {
        eprintln!("ERROR: {}", err);
    }

    let mut input = String::new();
    let stdin = io::stdin();
    let mut stdin_lock = stdin.lock();

    loop {
        input.clear();
        let bytes = stdin_lock
            .read_line(&mut input)
            .map_err(|err| AppError::io(err.to_string()))?;

        if bytes == 0 {
            break;
        }

        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        if line == "help" || line == "?" {
            print_help();
            continue;
        }

        let args = match split_command_line(line) {
            Ok(args) => args,
            Err(err) => {
                eprintln!("ERROR: {}", err);
                continue;
            }
        };

        if args.is_empty() {
            continue;
        }

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("zenith".to_string());
        argv.extend(args);

        let cli = match Cli::try_parse_from(argv) {
            Ok(cli) => cli,
            Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                println!("{err}");
                continue;
            }
            Err(err) => {
                eprintln!("ERROR: {}", normalize_parse_error(err));
                continue;
            }
        };

        if !cli.config_override.is_empty() {
            eprintln!(
                "ERROR: {}",
                AppError::invalid_input("config overrides apply to one-shot commands only")
            );
            continue;
        }

        if cli.command.needs_tasks()
            && let Err(err) = app.require_session().await
        {
            eprintln!("ERROR: {}", err);
            continue;
        }

        let identity_changed = cli.command.changes_identity();
        match run_command(&app, cli, Mode::Interactive).await {
            Ok(()) if identity_changed => {
                if let Err(err) = app.refresh().await {
                    eprintln!("ERROR: {}", err);
                }
            }
            Ok(()) => {}
            Err(err) => eprintln!("ERROR: {}", err),
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let mut args = std::env::args_os();
    args.next();
    if args.next().is_none() {
        if let Err(err) = run_interactive().await {
            eprintln!("ERROR: {}", err);
            std::process::exit(1);
        }
        return;
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            eprintln!("ERROR: {}", normalize_parse_error(err));
            std::process::exit(1);
        }
    };

    if let Err(err) = run_one_shot(cli).await {
        eprintln!("ERROR: {}", err);
        std::process::exit(1);
    }
}
