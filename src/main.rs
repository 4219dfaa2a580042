use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use agno_chat::app::{ChatApp, ChatError};
use agno_chat::commands::{parse_slash_command, SlashCommand, HELP_TEXT};
use agno_chat::config::EnvConfig;
use agno_chat::runtime::{lock_unpoisoned, RuntimeController};
use agno_chat::{logging, providers};
use session_store::{sessions_file, Feedback, JsonFileStorage, Message, Role, SessionRegistry};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

fn main() -> io::Result<()> {
    let env = EnvConfig::from_env();
    let cwd = std::env::current_dir()?;
    let data_dir = env.data_dir_or(&cwd);
    let log_path = logging::init(&data_dir, env.log_filter.as_deref())?;

    let provider_id = providers::provider_id(&env).to_string();
    let file_config = providers::file_config_for(&env).map_err(io::Error::other)?;
    let provider = providers::provider_for_id(&provider_id, file_config.as_ref())
        .map_err(io::Error::other)?;
    let agents = providers::agent_directory_for(&provider_id, file_config.as_ref());
    let initial_agent = env
        .agent
        .clone()
        .or_else(|| file_config.as_ref().and_then(|config| config.default_agent.clone()));

    let storage = JsonFileStorage::new(sessions_file(&data_dir));
    let registry = SessionRegistry::load(Box::new(storage));
    let mut app = ChatApp::new(registry, Box::new(agents), initial_agent.as_deref())
        .map_err(io::Error::other)?;
    if let Some(user_name) = env.user_name.clone() {
        app = app.with_user_label(user_name);
    }
    let app = Arc::new(Mutex::new(app));
    let controller = RuntimeController::new(Arc::clone(&app), provider);
    tracing::info!(provider = %provider_id, log = %log_path.display(), "agno-chat started");

    let mut repl = Repl {
        app,
        host: Arc::clone(&controller),
        data_dir,
        printer: StreamPrinter::default(),
    };
    repl.banner(&provider_id)?;
    let result = repl.run(spawn_stdin_reader()?);

    controller.cancel_all();
    result
}

fn spawn_stdin_reader() -> io::Result<Receiver<String>> {
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name("agno-chat-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if sender.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(receiver)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

struct Repl {
    app: Arc<Mutex<ChatApp>>,
    host: Arc<RuntimeController>,
    data_dir: PathBuf,
    printer: StreamPrinter,
}

impl Repl {
    fn banner(&self, provider_id: &str) -> io::Result<()> {
        let app = lock_unpoisoned(&self.app);
        let agent = app.active_agent();
        let mut out = io::stdout().lock();
        writeln!(
            out,
            "agno-chat ({provider_id}) talking to {} [{}] on {}",
            agent.name,
            agent.id,
            app.model()
        )?;
        writeln!(out, "{HELP_TEXT}")?;
        print_transcript(&app, &mut out)?;
        prompt(&mut out)
    }

    fn run(&mut self, lines: Receiver<String>) -> io::Result<()> {
        loop {
            self.host.wait_and_flush(POLL_INTERVAL);
            if self.host.take_render_request() {
                let app = lock_unpoisoned(&self.app);
                self.printer.render(&app, &mut io::stdout().lock())?;
            }

            match lines.try_recv() {
                Ok(line) => {
                    if self.handle_line(&line)? == Flow::Quit {
                        return Ok(());
                    }
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    if !self.host.wait_until_idle(Duration::from_secs(300)) {
                        tracing::warn!("exiting with runs still active");
                    }
                    let app = lock_unpoisoned(&self.app);
                    return self.printer.render(&app, &mut io::stdout().lock());
                }
            }
        }
    }

    fn handle_line(&mut self, line: &str) -> io::Result<Flow> {
        let mut out = io::stdout().lock();
        let Some(command) = parse_slash_command(line) else {
            if !line.trim().is_empty() {
                let mut host = Arc::clone(&self.host);
                let result = self.lock_app().send(&mut host, line, Vec::new());
                if let Err(error) = result {
                    report(&mut out, &error)?;
                    prompt(&mut out)?;
                }
            } else {
                prompt(&mut out)?;
            }
            return Ok(Flow::Continue);
        };

        let mut host = Arc::clone(&self.host);
        let mut app = lock_unpoisoned(&self.app);
        let result: Result<(), ChatError> = match command {
            SlashCommand::Help => {
                writeln!(out, "{HELP_TEXT}")?;
                Ok(())
            }
            SlashCommand::New => {
                app.new_chat();
                writeln!(out, "Started a new chat with {}.", app.active_agent().name)?;
                Ok(())
            }
            SlashCommand::Sessions => {
                print_sessions(&app, &mut out)?;
                Ok(())
            }
            SlashCommand::History => {
                print_transcript(&app, &mut out)?;
                Ok(())
            }
            SlashCommand::Agents => {
                for agent in app.agents().agents() {
                    let marker = if agent.id == app.active_agent().id { '*' } else { ' ' };
                    writeln!(out, "{marker} {:<12} {} - {}", agent.id, agent.name, agent.description)?;
                }
                Ok(())
            }
            SlashCommand::Select(index) => match nth_session_id(&app, index) {
                Some(id) => match app.select_session(&id) {
                    Ok(()) => {
                        print_transcript(&app, &mut out)?;
                        Ok(())
                    }
                    Err(error) => Err(error),
                },
                None => no_such(&mut out, "session", index)?,
            },
            SlashCommand::Agent(agent_id) => match app.set_active_agent(&agent_id) {
                Ok(_) => {
                    writeln!(
                        out,
                        "Now talking to {} on {}.",
                        app.active_agent().name,
                        app.model()
                    )?;
                    print_transcript(&app, &mut out)?;
                    Ok(())
                }
                Err(error) => Err(error),
            },
            SlashCommand::Model(model_id) => {
                app.set_model(&model_id);
                writeln!(out, "Model: {}", app.model())?;
                Ok(())
            }
            SlashCommand::Delete(index) => match nth_session_id(&app, index) {
                Some(id) => app.delete_session(&mut host, &id),
                None => no_such(&mut out, "session", index)?,
            },
            SlashCommand::Edit(index, text) => match nth_message_id(&app, index) {
                Some(id) => app.edit_and_regenerate(&mut host, &id, &text),
                None => no_such(&mut out, "message", index)?,
            },
            SlashCommand::DeleteMessage(index) => match nth_message_id(&app, index) {
                Some(id) => app.delete_message(&mut host, &id),
                None => no_such(&mut out, "message", index)?,
            },
            SlashCommand::Rename(title) => app.rename_current(&title),
            SlashCommand::Feedback(index, positive) => match nth_message_id(&app, index) {
                Some(id) => {
                    let feedback = positive.map(|up| if up { Feedback::Up } else { Feedback::Down });
                    app.set_feedback(&id, feedback)
                }
                None => no_such(&mut out, "message", index)?,
            },
            SlashCommand::Knowledge(document_ids) => {
                app.set_knowledge(document_ids);
                writeln!(out, "Knowledge: {}", describe_knowledge(app.knowledge()))?;
                Ok(())
            }
            SlashCommand::Cancel => {
                if !app.cancel(&mut host) {
                    writeln!(out, "Nothing to cancel.")?;
                }
                Ok(())
            }
            SlashCommand::Clear => app.clear_chat(&mut host),
            SlashCommand::Export => match app.export_current() {
                Ok(Some(export)) => {
                    let path = self.data_dir.join(&export.file_name);
                    fs::create_dir_all(&self.data_dir)?;
                    fs::write(&path, export.markdown)?;
                    writeln!(out, "Exported to {}", path.display())?;
                    Ok(())
                }
                Ok(None) => {
                    writeln!(out, "Nothing to export.")?;
                    Ok(())
                }
                Err(error) => Err(error),
            },
            SlashCommand::Quit => return Ok(Flow::Quit),
            SlashCommand::Invalid(usage) => {
                writeln!(out, "{usage}")?;
                Ok(())
            }
            SlashCommand::Unknown(name) => {
                writeln!(out, "Unknown command {name}. {HELP_TEXT}")?;
                Ok(())
            }
        };

        if let Err(error) = result {
            report(&mut out, &error)?;
        }
        if !app.is_streaming(app.current_session_id().unwrap_or_default()) {
            prompt(&mut out)?;
        }
        Ok(Flow::Continue)
    }

    fn lock_app(&self) -> MutexGuard<'_, ChatApp> {
        lock_unpoisoned(&self.app)
    }
}

/// Prints the streaming reply of the selected session as it grows.
#[derive(Debug, Default)]
struct StreamPrinter {
    message_id: Option<String>,
    printed: String,
    logs: usize,
    finished: bool,
}

impl StreamPrinter {
    fn render(&mut self, app: &ChatApp, out: &mut impl Write) -> io::Result<()> {
        let Some(last) = app.current_messages().and_then(|messages| messages.last()) else {
            return Ok(());
        };
        if last.role != Role::Assistant {
            return Ok(());
        }

        if self.message_id.as_deref() != Some(last.id.as_str()) {
            if !last.is_streaming {
                return Ok(());
            }
            *self = Self {
                message_id: Some(last.id.clone()),
                ..Self::default()
            };
            write!(out, "{}: ", speaker(app, last))?;
        }
        if self.finished {
            return Ok(());
        }

        for entry in last.logs.iter().skip(self.logs) {
            write!(out, "\n  [{:?}] {}\n", entry.kind, entry.title)?;
        }
        self.logs = last.logs.len();

        match last.text.strip_prefix(self.printed.as_str()) {
            Some(delta) => write!(out, "{delta}")?,
            None => write!(out, "\n{}", last.text)?,
        }
        self.printed = last.text.clone();

        if !last.is_streaming {
            writeln!(out)?;
            self.finished = true;
            prompt(out)?;
        }
        out.flush()
    }
}

fn speaker<'a>(app: &'a ChatApp, message: &'a Message) -> &'a str {
    match message.role {
        Role::User => app.user_label(),
        Role::Assistant => message.agent_name.as_deref().unwrap_or("Assistant"),
        Role::System => "System",
    }
}

fn print_transcript(app: &ChatApp, out: &mut impl Write) -> io::Result<()> {
    let Some(session) = app.current_session() else {
        return Ok(());
    };
    writeln!(out, "== {} ==", session.title)?;
    for (index, message) in session.messages.iter().enumerate() {
        let feedback = match message.feedback {
            Some(Feedback::Up) => " (+)",
            Some(Feedback::Down) => " (-)",
            None => "",
        };
        writeln!(out, "[{}] {}: {}{feedback}", index + 1, speaker(app, message), message.text)?;
    }
    Ok(())
}

fn print_sessions(app: &ChatApp, out: &mut impl Write) -> io::Result<()> {
    let current = app.current_session_id();
    for (index, session) in app.sessions_for_sidebar().iter().enumerate() {
        let marker = if Some(session.id.as_str()) == current { '*' } else { ' ' };
        let streaming = if app.is_streaming(&session.id) { " (streaming)" } else { "" };
        writeln!(
            out,
            "{marker} [{}] {} - {} messages{streaming}",
            index + 1,
            session.title,
            session.messages.len()
        )?;
    }
    Ok(())
}

fn nth_session_id(app: &ChatApp, index: usize) -> Option<String> {
    app.sessions_for_sidebar()
        .get(index.checked_sub(1)?)
        .map(|session| session.id.clone())
}

fn nth_message_id(app: &ChatApp, index: usize) -> Option<String> {
    app.current_messages()?
        .get(index.checked_sub(1)?)
        .map(|message| message.id.clone())
}

fn describe_knowledge(document_ids: &[String]) -> String {
    if document_ids.is_empty() {
        "none".to_string()
    } else {
        document_ids.join(", ")
    }
}

fn no_such(out: &mut impl Write, what: &str, index: usize) -> io::Result<Result<(), ChatError>> {
    writeln!(out, "No {what} #{index}.")?;
    Ok(Ok(()))
}

fn report(out: &mut impl Write, error: &ChatError) -> io::Result<()> {
    writeln!(out, "error: {error}")
}

fn prompt(out: &mut impl Write) -> io::Result<()> {
    write!(out, "> ")?;
    out.flush()
}
