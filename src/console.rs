use crate::error::Result;
use crate::events::{EventFilter, EventReceiver, SessionEvent, Severity};
use crate::session::{SessionOrchestrator, SessionView};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const PROGRESS_WIDTH: usize = 20;
const REFRESH_INTERVAL: Duration = Duration::from_millis(250);

/// What a key press asks the console to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Select the n-th listed camera, counting from 1
    Select(usize),
    Start,
    Stop,
    Extract,
    /// First press of the remove key; waits for confirmation
    ConfirmRemove,
    Remove,
    CancelRemove,
    Reload,
    Help,
    Quit,
}

/// Turns key presses into commands, holding the remove confirmation
#[derive(Debug, Default)]
pub struct KeyInterpreter {
    confirming_remove: bool,
}

impl KeyInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interpret(&mut self, key: KeyEvent) -> Option<ConsoleCommand> {
        if is_interrupt(&key) {
            self.confirming_remove = false;
            return Some(ConsoleCommand::Quit);
        }
        if self.confirming_remove {
            self.confirming_remove = false;
            return match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => Some(ConsoleCommand::Remove),
                _ => Some(ConsoleCommand::CancelRemove),
            };
        }

        let command = map_key(key)?;
        if command == ConsoleCommand::ConfirmRemove {
            self.confirming_remove = true;
        }
        Some(command)
    }
}

/// Key bindings
pub fn map_key(key: KeyEvent) -> Option<ConsoleCommand> {
    if is_interrupt(&key) {
        return Some(ConsoleCommand::Quit);
    }
    match key.code {
        KeyCode::Char(c @ '1'..='9') => c
            .to_digit(10)
            .map(|digit| ConsoleCommand::Select(digit as usize)),
        KeyCode::Char('s') => Some(ConsoleCommand::Start),
        KeyCode::Char('t') => Some(ConsoleCommand::Stop),
        KeyCode::Char('e') => Some(ConsoleCommand::Extract),
        KeyCode::Char('r') => Some(ConsoleCommand::ConfirmRemove),
        KeyCode::Char('l') => Some(ConsoleCommand::Reload),
        KeyCode::Char('h') | KeyCode::Char('?') => Some(ConsoleCommand::Help),
        KeyCode::Char('q') | KeyCode::Esc => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

/// Raw mode delivers Ctrl-C as a key instead of SIGINT
fn is_interrupt(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && matches!(key.code, KeyCode::Char('c'))
}

pub fn help_text() -> &'static str {
    "keys: 1-9 select camera | s start | t stop | e extract | r remove | l reload | q quit"
}

pub fn progress_bar(percent: f64, width: usize) -> String {
    let percent = percent.clamp(0.0, 100.0);
    let filled = ((percent / 100.0) * width as f64).round() as usize;
    format!(
        "[{}{}] {:>3.0}%",
        "#".repeat(filled),
        "-".repeat(width - filled),
        percent
    )
}

/// Render the session as plain lines
pub fn render_view(view: &SessionView) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} (member {})",
        view.member.display_name(),
        view.member.id
    ));

    if view.cameras.is_empty() {
        lines.push("  no cameras available".to_string());
    } else if let Some(loaded_at) = view.cameras_loaded_at {
        lines.push(format!("  cameras as of {}", loaded_at.format("%H:%M:%S UTC")));
    }
    for (index, camera) in view.cameras.iter().enumerate() {
        let marker = if view.selected == Some(camera.id) { '>' } else { ' ' };
        let collecting = if view.is_collecting(camera.id) {
            "  collecting"
        } else {
            ""
        };
        lines.push(format!(
            "{} [{}] {} (#{}){}",
            marker,
            index + 1,
            camera.name,
            camera.id,
            collecting
        ));
    }

    let mut extraction = format!("extraction: {}", view.phase);
    if let Some(percent) = view.progress_percent() {
        extraction.push(' ');
        extraction.push_str(&progress_bar(percent, PROGRESS_WIDTH));
    }
    if let Some(snapshot) = &view.last_snapshot {
        if !snapshot.stage.is_empty() {
            extraction.push_str(&format!(" ({})", snapshot.stage));
        }
    }
    lines.push(extraction);

    if view.closed {
        lines.push("session closed".to_string());
    } else if view.busy {
        lines.push("working...".to_string());
    }

    lines.join("\n")
}

pub fn format_notification(event: &SessionEvent) -> String {
    let label = match event.severity() {
        Severity::Success => "ok",
        Severity::Info => "info",
        Severity::Warning => "warn",
        Severity::Error => "error",
    };
    format!("[{}] {}", label, event.description())
}

/// Raw mode needs explicit carriage returns
fn emit(text: &str) {
    let mut stdout = std::io::stdout();
    for line in text.lines() {
        let _ = write!(stdout, "{}\r\n", line);
    }
    let _ = stdout.flush();
}

/// Keyboard front end for one session
pub struct SessionConsole {
    session: Arc<SessionOrchestrator>,
    cancellation_token: CancellationToken,
}

impl SessionConsole {
    pub fn new(session: Arc<SessionOrchestrator>) -> Self {
        Self {
            session,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Run until the operator quits
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting console for session {}",
            self.session.session_id()
        );

        let mut keys = self.spawn_key_reader();
        let mut notifications = EventReceiver::new(
            self.session.notifications().subscribe(),
            EventFilter::All,
            "console".to_string(),
        );
        let mut interpreter = KeyInterpreter::new();
        let mut refresh = tokio::time::interval(REFRESH_INTERVAL);
        let mut last_rendered = String::new();

        emit(help_text());

        loop {
            tokio::select! {
                _ = self.cancellation_token.cancelled() => break,
                key = keys.recv() => {
                    let Some(key) = key else {
                        debug!("Key reader closed");
                        break;
                    };
                    let Some(command) = interpreter.interpret(key) else {
                        continue;
                    };
                    if command == ConsoleCommand::Quit {
                        info!("Quit key pressed - closing session");
                        break;
                    }
                    self.dispatch(command);
                }
                event = notifications.recv() => {
                    match event {
                        Ok(event) => emit(&format_notification(&event)),
                        Err(e) => debug!("Notification stream: {}", e),
                    }
                }
                _ = refresh.tick() => {
                    let rendered = render_view(&self.session.view());
                    if rendered != last_rendered {
                        emit(&rendered);
                        last_rendered = rendered;
                    }
                }
            }
        }

        self.session.dispose();
        self.stop();
        Ok(())
    }

    /// Stop reading keys and restore the terminal
    pub fn stop(&self) {
        self.cancellation_token.cancel();
        let _ = disable_raw_mode();
    }

    fn dispatch(&self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::Select(position) => {
                let view = self.session.view();
                match view.cameras.get(position - 1) {
                    Some(camera) => {
                        if let Err(e) = self.session.select_camera(camera.id) {
                            debug!("Selection rejected: {}", e);
                        }
                    }
                    None => emit(&format!("no camera at position {}", position)),
                }
            }
            ConsoleCommand::ConfirmRemove => {
                emit("remove stored embeddings for the selected camera? press y to confirm")
            }
            ConsoleCommand::CancelRemove => emit("remove cancelled"),
            ConsoleCommand::Help => emit(help_text()),
            ConsoleCommand::Quit => {}
            ConsoleCommand::Start
            | ConsoleCommand::Stop
            | ConsoleCommand::Extract
            | ConsoleCommand::Remove
            | ConsoleCommand::Reload => self.spawn_operation(command),
        }
    }

    /// Remote operations run off the input loop; outcomes arrive as notifications
    fn spawn_operation(&self, command: ConsoleCommand) {
        let session = Arc::clone(&self.session);
        tokio::spawn(async move {
            let outcome = match command {
                ConsoleCommand::Start => session.start().await.map(|_| ()),
                ConsoleCommand::Stop => session.stop().await.map(|_| ()),
                ConsoleCommand::Extract => session.extract().await.map(|_| ()),
                ConsoleCommand::Remove => session.remove().await.map(|_| ()),
                ConsoleCommand::Reload => session.reload_cameras().await.map(|_| ()),
                _ => Ok(()),
            };
            if let Err(e) = outcome {
                debug!("{:?} did not complete: {}", command, e);
            }
        });
    }

    fn spawn_key_reader(&self) -> mpsc::UnboundedReceiver<KeyEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancellation_token = self.cancellation_token.clone();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }
            debug!("Raw mode enabled - console accepting keys");

            while !cancellation_token.is_cancelled() {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        if let Ok(Event::Key(key_event)) = event::read() {
                            if key_event.kind == KeyEventKind::Press
                                && sender.send(key_event).is_err()
                            {
                                break;
                            }
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }
            debug!("Key reader exited");
        });

        receiver
    }
}
