//! Terminal user interface using ratatui

mod app;
mod events;
mod keys;
mod styles;

pub use app::Browser;
pub use events::{Event, EventHandler};

use anyhow::Result;
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::io;
use tracing::debug;

use crate::app::App;

pub type Backend = CrosstermBackend<io::Stdout>;
pub type Frame<'a> = ratatui::Frame<'a>;

/// Initialize the terminal for TUI mode
pub fn init_terminal() -> Result<Terminal<Backend>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

/// Restore the terminal to normal mode
pub fn restore_terminal(terminal: &mut Terminal<Backend>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Best-effort restore from the panic hook, where no terminal handle is available
pub fn restore_terminal_on_panic() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), LeaveAlternateScreen);
}

/// Run the post browser until the user quits
pub async fn run(app: &mut App) -> Result<()> {
    let mut terminal = init_terminal()?;
    let mut browser = Browser::new(
        app.list_controller(),
        app.theme().clone(),
        app.config().prefetch_next_page,
    );
    let mut event_handler = EventHandler::default();

    browser.start();
    let result = run_app(&mut terminal, &mut browser, &mut event_handler).await;

    restore_terminal(&mut terminal)?;
    result
}

/// Main application loop: redraw when needed, then wait for input or a finished fetch
async fn run_app(
    terminal: &mut Terminal<Backend>,
    browser: &mut Browser,
    event_handler: &mut EventHandler,
) -> Result<()> {
    let mut redraw = true;
    loop {
        if redraw || browser.take_dirty() {
            terminal.draw(|frame| browser.render(frame))?;
        }

        redraw = tokio::select! {
            event = event_handler.next() => match event {
                Some(Event::Key(key)) => {
                    browser.handle_key(key);
                    true
                }
                Some(Event::Resize(width, height)) => {
                    debug!("Resized to {}x{}", width, height);
                    true
                }
                Some(Event::Tick) => false,
                None => break,
            },
            Some(message) = browser.next_message() => {
                browser.apply(message);
                false
            }
        };

        if browser.should_quit() {
            break;
        }
    }
    Ok(())
}
