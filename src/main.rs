use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use pbtrack::config::Config;
use pbtrack::console::{ConsoleMarkdownList, ConsolePresenter};
use pbtrack::context::SyncContext;
use pbtrack::list_command::{EntriesArgs, ListCommand};
use pbtrack::logging::setup_logger;
use pbtrack::pocketbase::PocketBaseClient;
use pbtrack::timer_command::{StartArgs, StopArgs, TimerCommand};
use pbtrack::watch_command::WatchCommand;

/// PocketBaseのタイムトラッカーを操作するためのCLIアプリケーション。
///
/// # Examples
/// ```
/// $ cargo run -- entries --from 2024-04-01
/// $ cargo run -- start --project abc123
/// $ cargo run -- watch
/// ```
#[derive(Debug, Parser)]
#[clap(version, about)]
struct Args {
    #[clap(short = 'v', long = "verbose", help = "Prints debug logs")]
    verbose: bool,

    #[clap(subcommand)]
    subcommand: SubCommands,
}

/// サブコマンドを表す列挙型。
#[derive(Debug, Subcommand)]
enum SubCommands {
    /// Lists time entries grouped by day
    Entries(EntriesArgs),
    /// Starts a new time entry
    Start(StartArgs),
    /// Stops a time entry
    Stop(StopArgs),
    /// Lists projects
    Projects,
    /// Lists tasks
    Tasks,
    /// Lists tags
    Tags,
    /// Logs realtime changes until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logger(args.verbose)?;

    let config = Config::load().context("Failed to load config")?;
    let client = PocketBaseClient::new(&config.url);
    let user = client
        .auth_with_password(&config.email, &config.password)
        .await
        .context("Failed to log in to PocketBase")?;
    let owner_id = user.id.clone();

    let context = SyncContext::new(Arc::new(client), config.sync_options());
    context.profile.init(Some(user));
    info!("Profile completion: {}%", context.profile.completion());

    let mut stdout = io::stdout();
    let mut presenter = ConsoleMarkdownList::new(&mut stdout);
    let list = ListCommand::new(&context, &owner_id);
    let timer = TimerCommand::new(&context, &owner_id);

    match args.subcommand {
        SubCommands::Entries(entries) => {
            let time_entries = list.entries(entries).await?;
            presenter.show_time_entries(&time_entries)?;
        }
        SubCommands::Start(start) => {
            let entry = timer.start(start).await?;
            println!("{}", entry.id);
        }
        SubCommands::Stop(stop) => {
            let entry = timer.stop(stop).await?;
            presenter.show_time_entries(&[entry])?;
        }
        SubCommands::Projects => presenter.show_items(&list.projects().await)?,
        SubCommands::Tasks => presenter.show_items(&list.tasks().await)?,
        SubCommands::Tags => presenter.show_items(&list.tags().await)?,
        SubCommands::Watch => WatchCommand::new(&context, &owner_id).run().await?,
    }

    Ok(())
}
