use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use logconsole::api::{HttpApi, LogQueryClient};
use logconsole::config::ConsoleConfig;
use logconsole::dashboard::{DashboardAggregator, RefreshOutcome};
use logconsole::error::{ConsoleError, ErrorKind, Result};
use logconsole::export::{ExportCoordinator, ExportOutcome};
use logconsole::log_entry::{Filter, LogDraft, LogPatch, SOURCES, Severity};
use logconsole::render;
use logconsole::session::SessionStore;
use logconsole::user::{NewUser, UserPatch, UserQuery};

#[derive(Parser)]
#[command(name = "logconsole", version, about = "Operator console for the log management API")]
struct Cli {
    /// Config file (defaults to ./config.yaml)
    #[arg(long, global = true, env = "LOGCONSOLE_CONFIG")]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and remember the session
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long, env = "LOGCONSOLE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Show who is logged in
    Whoami,
    /// Browse and edit log entries
    Logs {
        #[command(subcommand)]
        command: LogsCommand,
    },
    /// Manage user accounts
    Users {
        #[command(subcommand)]
        command: UsersCommand,
    },
    /// Severity distribution, daily trend and recent logs
    Dashboard {
        #[command(flatten)]
        filter: FilterArgs,
        /// Range length when --start is not given
        #[arg(long, default_value_t = 7)]
        days: u64,
    },
    /// Export matching logs to CSV and print the download URL
    Export {
        #[command(flatten)]
        filter: FilterArgs,
    },
}

#[derive(Args, Clone, Default)]
struct FilterArgs {
    /// First day, YYYY-MM-DD
    #[arg(long)]
    start: Option<NaiveDate>,
    /// Last day, YYYY-MM-DD
    #[arg(long)]
    end: Option<NaiveDate>,
    #[arg(long)]
    severity: Option<Severity>,
    #[arg(long)]
    source: Option<String>,
}

impl FilterArgs {
    fn into_filter(self) -> Filter {
        Filter {
            start: self.start,
            end: self.end,
            severity: self.severity,
            source: self.source,
            search: None,
        }
    }
}

#[derive(Subcommand)]
enum LogsCommand {
    List {
        #[command(flatten)]
        filter: FilterArgs,
        /// Match message, source or details on the fetched page
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u64,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },
    Show {
        id: String,
    },
    Create {
        #[arg(long)]
        severity: Severity,
        #[arg(long)]
        source: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        details: Option<String>,
    },
    Update {
        id: String,
        #[arg(long)]
        severity: Option<Severity>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        details: Option<String>,
    },
    Delete {
        id: String,
    },
}

#[derive(Subcommand)]
enum UsersCommand {
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        admin: Option<bool>,
        #[arg(long, default_value_t = 100)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    Show {
        id: String,
    },
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "LOGCONSOLE_NEW_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        admin: Option<bool>,
    },
    Delete {
        id: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "logconsole=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = ConsoleConfig::load(cli.config.as_deref())?;
    let session = Arc::new(SessionStore::open(config.session_path()));
    let api = Arc::new(HttpApi::new(&config.api, session.clone())?);
    debug!("Using API at {}", api.base_url());

    match cli.command {
        Command::Login { username, password } => {
            let session = api.login(&username, &password).await?;
            println!("Logged in as {}", session.user.display_name());
        }
        Command::Logout => {
            api.logout().await?;
            println!("Logged out");
        }
        Command::Whoami => match session.current() {
            Some(s) if cli.json => print_json(&s.user)?,
            Some(s) => println!(
                "{} ({}){}",
                s.user.display_name(),
                s.user.username,
                if s.user.is_admin { " [admin]" } else { "" }
            ),
            None => println!("Not logged in"),
        },
        Command::Logs { command } => run_logs(&api, command, cli.json).await?,
        Command::Users { command } => run_users(&api, command, cli.json).await?,
        Command::Dashboard { filter, days } => {
            let mut query = filter.clone().into_filter();
            if filter.start.is_none() && filter.end.is_none() {
                let range = Filter::last_days(Local::now().date_naive(), days);
                query.start = range.start;
                query.end = range.end;
            }
            run_dashboard(api, &config, &query, cli.json).await?;
        }
        Command::Export { filter } => {
            run_export(api, &config, &filter.into_filter()).await?;
        }
    }
    Ok(())
}

async fn run_logs(api: &HttpApi, command: LogsCommand, json: bool) -> Result<()> {
    match command {
        LogsCommand::List {
            filter,
            search,
            page,
            page_size,
        } => {
            let mut filter = filter.into_filter();
            filter.search = search;
            let offset = page.saturating_sub(1) * u64::from(page_size);
            let result = api.list_logs(page_size, offset, &filter).await?;
            let items: Vec<_> = match filter.search_term() {
                Some(term) => result
                    .items
                    .into_iter()
                    .filter(|r| r.matches_search(term))
                    .collect(),
                None => result.items,
            };
            if json {
                print_json(&items)?;
            } else {
                print!("{}", render::log_table(&items));
                let pages = result.total.div_ceil(u64::from(page_size.max(1)));
                println!("page {page} of {pages} ({} logs)", result.total);
            }
        }
        LogsCommand::Show { id } => {
            let record = api.get_log(&id).await?;
            if json {
                print_json(&record)?;
            } else {
                print!("{}", render::log_detail(&record));
            }
        }
        LogsCommand::Create {
            severity,
            source,
            message,
            details,
        } => {
            if !SOURCES.contains(&source.as_str()) {
                warn!("'{source}' is not one of the known sources: {}", SOURCES.join(", "));
            }
            let draft = LogDraft {
                severity,
                source,
                message,
                details,
            };
            let record = api.create_log(&draft).await?;
            println!("Log {} created", record.id);
        }
        LogsCommand::Update {
            id,
            severity,
            source,
            message,
            details,
        } => {
            let patch = LogPatch {
                severity,
                source,
                message,
                details,
            };
            let record = api.update_log(&id, &patch).await?;
            println!("Log {} updated", record.id);
        }
        LogsCommand::Delete { id } => {
            if api.delete_log(&id).await? {
                println!("Log {id} deleted");
            } else {
                return Err(ConsoleError::Api {
                    status: 200,
                    message: format!("server did not confirm deletion of log {id}"),
                });
            }
        }
    }
    Ok(())
}

async fn run_users(api: &HttpApi, command: UsersCommand, json: bool) -> Result<()> {
    match command {
        UsersCommand::List {
            search,
            status,
            admin,
            limit,
            offset,
        } => {
            let query = UserQuery {
                search,
                status,
                role_admin: admin,
                limit,
                offset,
            };
            let users = api.list_users(&query).await?;
            if json {
                print_json(&users)?;
            } else {
                print!("{}", render::user_table(&users));
            }
        }
        UsersCommand::Show { id } => {
            let user = api.get_user(&id).await?;
            if json {
                print_json(&user)?;
            } else {
                print!("{}", render::user_table(std::slice::from_ref(&user)));
            }
        }
        UsersCommand::Create {
            username,
            name,
            email,
            password,
        } => {
            let user = api
                .create_user(&NewUser {
                    username,
                    password,
                    name,
                    email,
                })
                .await?;
            println!("User {} created", user.username);
        }
        UsersCommand::Update {
            id,
            name,
            email,
            active,
            admin,
        } => {
            let patch = UserPatch {
                name,
                email,
                is_active: active,
                is_admin: admin,
            };
            let user = api.update_user(&id, &patch).await?;
            println!("User {} updated", user.username);
        }
        UsersCommand::Delete { id } => {
            if api.delete_user(&id).await? {
                println!("User {id} deleted");
            } else {
                return Err(ConsoleError::Api {
                    status: 200,
                    message: format!("server did not confirm deletion of user {id}"),
                });
            }
        }
    }
    Ok(())
}

async fn run_dashboard(
    api: Arc<HttpApi>,
    config: &ConsoleConfig,
    filter: &Filter,
    json: bool,
) -> Result<()> {
    let aggregator = DashboardAggregator::new(api, config.dashboard);

    let refresh = aggregator.refresh(filter);
    tokio::pin!(refresh);
    let outcome = tokio::select! {
        outcome = &mut refresh => outcome?,
        _ = tokio::signal::ctrl_c() => {
            aggregator.close();
            refresh.await?
        }
    };

    match outcome {
        RefreshOutcome::Updated(snapshot) if json => print_json(snapshot.as_ref())?,
        RefreshOutcome::Updated(snapshot) => print!("{}", render::dashboard(&snapshot)),
        RefreshOutcome::Superseded | RefreshOutcome::Closed => {
            info!("Dashboard refresh abandoned");
        }
    }
    Ok(())
}

async fn run_export(api: Arc<HttpApi>, config: &ConsoleConfig, filter: &Filter) -> Result<()> {
    let coordinator = ExportCoordinator::new(api, config.export);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message("Starting export...");

    let mut states = coordinator.subscribe();
    let progress = {
        let spinner = spinner.clone();
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let message = render::export_state(&states.borrow_and_update());
                spinner.set_message(message);
            }
        })
    };

    let export = coordinator.export(filter);
    tokio::pin!(export);
    let result = tokio::select! {
        result = &mut export => result,
        _ = tokio::signal::ctrl_c() => {
            coordinator.cancel();
            export.await
        }
    };
    progress.abort();

    match result {
        Ok(ExportOutcome::Ready { download_url, .. }) => {
            spinner.finish_with_message("CSV ready");
            println!("{download_url}");
            Ok(())
        }
        Ok(ExportOutcome::Busy) => {
            spinner.finish_with_message("An export is already running");
            Ok(())
        }
        Ok(ExportOutcome::Cancelled) => {
            spinner.finish_with_message("Stopped waiting; the job keeps running on the server");
            Ok(())
        }
        Err(e) => {
            spinner.finish_and_clear();
            Err(e)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error[{}]: {e}", e.kind());
            if e.kind() == ErrorKind::Authentication {
                eprintln!("hint: run `logconsole login` to start a new session");
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
