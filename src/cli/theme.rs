use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::app::App;
use crate::storage::ThemeMode;

/// Show or change the interface theme
#[derive(Debug, Args)]
pub struct ThemeCommand {
    /// New theme; prints the current one when omitted
    #[arg(value_enum)]
    pub mode: Option<ThemeMode>,
}

impl ThemeCommand {
    pub fn execute(&self, app: &App) -> Result<()> {
        let theme = app.theme();
        match self.mode {
            Some(mode) => {
                theme.set(mode)?;
                info!("Theme set to {}", mode);
                println!("Theme set to {}", mode);
            }
            None => println!("{} ({:?})", theme.mode(), theme.appearance()),
        }
        Ok(())
    }
}
