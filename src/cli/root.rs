use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info};

use super::list::{ListCommand, OutputFormat};
use super::post::PostCommand;
use super::theme::ThemeCommand;
use crate::app::App;
use crate::config::Config;

/// Folio - browse a blog from your terminal
#[derive(Parser)]
#[command(
    name = "folio",
    version,
    about = "Browse a blog from your terminal",
    long_about = r#"Folio lists blog posts with search, tag and author filters, paginated and cached.

Examples:
  folio                                  # Start the interactive browser
  folio list --tag Rust --page 2         # Print one page of posts
  folio post getting-started-with-rust   # Print a single post
  folio post create --title "Notes" --author "Leanne Graham" --tag Rust
  folio post delete 3                    # Delete a post by id
  folio theme light                      # Switch the interface theme"#
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long = "debug", global = true)]
    pub debug: bool,

    /// Configuration file to use instead of the default search path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the interactive browser (default)
    Browse,

    /// Print one page of posts
    List(ListCommand),

    /// Print a single post, or create, update or delete one
    Post(PostCommand),

    /// List every tag in use
    Tags {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List every author
    Authors {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show or change the interface theme
    Theme(ThemeCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = Config::init(self.config.as_deref()).await?;

        let interactive = matches!(self.command, None | Some(Commands::Browse));
        let log_file = interactive.then(|| config.log_path());
        crate::init_logging(self.debug, log_file.as_deref())?;
        if self.debug {
            debug!("Debug logging enabled");
        }
        debug!("Configuration initialized");

        let mut app = App::new(config).await?;

        let result = match self.command {
            None | Some(Commands::Browse) => app.run_interactive().await,
            Some(Commands::List(cmd)) => cmd.execute(&app).await,
            Some(Commands::Post(cmd)) => cmd.execute(&app).await,
            Some(Commands::Tags { format }) => {
                let tags = app.service().tags().await?;
                print_names(&tags, format)
            }
            Some(Commands::Authors { format }) => {
                let authors = app.service().authors().await?;
                print_names(&authors, format)
            }
            Some(Commands::Theme(cmd)) => cmd.execute(&app),
        };

        app.shutdown();
        info!("Application finished");
        result
    }
}

fn print_names(names: &[String], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(names)?),
        OutputFormat::Text => {
            for name in names {
                println!("{}", name);
            }
        }
    }
    Ok(())
}
