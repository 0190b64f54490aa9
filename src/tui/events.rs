use crossterm::event::{Event as CrosstermEvent, KeyEvent, KeyEventKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Terminal events delivered to the browser loop
#[derive(Debug, Clone)]
pub enum Event {
    /// Keyboard input event
    Key(KeyEvent),

    /// Terminal resize event
    Resize(u16, u16),

    /// Periodic tick event
    Tick,
}

/// Reads terminal input on a dedicated thread and forwards it as [`Event`]s
pub struct EventHandler {
    receiver: mpsc::UnboundedReceiver<Event>,
    stop: Arc<AtomicBool>,
}

impl EventHandler {
    /// Start reading input; a `Tick` is sent whenever `tick_rate` passes
    /// without any input
    pub fn new(tick_rate: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                let event = match crossterm::event::poll(tick_rate) {
                    Ok(true) => match crossterm::event::read() {
                        Ok(event) => convert_crossterm_event(event),
                        Err(err) => {
                            warn!("Failed to read terminal event: {}", err);
                            break;
                        }
                    },
                    Ok(false) => Some(Event::Tick),
                    Err(err) => {
                        warn!("Failed to poll terminal events: {}", err);
                        break;
                    }
                };

                if let Some(event) = event {
                    if sender.send(event).is_err() {
                        break;
                    }
                }
            }
        });

        Self { receiver, stop }
    }

    /// Get the next event
    pub async fn next(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

impl Drop for EventHandler {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn convert_crossterm_event(event: CrosstermEvent) -> Option<Event> {
    match event {
        // Windows reports both press and release
        CrosstermEvent::Key(key) if key.kind == KeyEventKind::Press => Some(Event::Key(key)),
        CrosstermEvent::Resize(width, height) => Some(Event::Resize(width, height)),
        _ => None,
    }
}
