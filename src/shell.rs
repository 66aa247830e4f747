//! Line-oriented front end over a [`Session`].

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::models::Conversation;
use crate::services::{
    MessageGroup, Notice, NoticeLevel, SwipeDirection, SwipeOutcome, SwipeRow, UndoToken,
    SWIPE_COMMIT_DISTANCE,
};
use crate::session::Session;

const HELP: &str = "\
commands:
  list                      show conversations
  resolve <user>            open a direct chat
  open <conv>               load and mark a conversation read
  send <conv> <text>        send a message
  groups <conv>             show grouped messages
  press <id>                long-press a row (enters selection mode)
  select <id>               toggle a row while selecting
  archive | delete          act on the selection
  swipe <id> left|right     swipe a row past the commit distance
  undo                      reverse the last archive or delete
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    List,
    Resolve(String),
    Open(String),
    Send { conversation_id: String, text: String },
    Groups(String),
    Press(String),
    Select(String),
    Archive,
    Delete,
    Swipe { id: String, direction: SwipeDirection },
    Undo,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };
        let arg = |usage: &str| {
            if rest.is_empty() {
                Err(format!("usage: {}", usage))
            } else {
                Ok(rest.to_string())
            }
        };

        match name {
            "list" | "ls" => Ok(Command::List),
            "resolve" => arg("resolve <user>").map(Command::Resolve),
            "open" => arg("open <conv>").map(Command::Open),
            "groups" => arg("groups <conv>").map(Command::Groups),
            "press" => arg("press <id>").map(Command::Press),
            "select" => arg("select <id>").map(Command::Select),
            "send" => match rest.split_once(char::is_whitespace) {
                Some((conversation_id, text)) if !text.trim().is_empty() => Ok(Command::Send {
                    conversation_id: conversation_id.to_string(),
                    text: text.trim().to_string(),
                }),
                _ => Err("usage: send <conv> <text>".to_string()),
            },
            "swipe" => {
                let mut parts = rest.split_whitespace();
                let id = parts.next();
                let direction = match parts.next() {
                    Some("left") => Some(SwipeDirection::Left),
                    Some("right") => Some(SwipeDirection::Right),
                    _ => None,
                };
                match (id, direction) {
                    (Some(id), Some(direction)) => Ok(Command::Swipe {
                        id: id.to_string(),
                        direction,
                    }),
                    _ => Err("usage: swipe <id> left|right".to_string()),
                }
            }
            "archive" => Ok(Command::Archive),
            "delete" => Ok(Command::Delete),
            "undo" => Ok(Command::Undo),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            "" => Err(String::new()),
            other => Err(format!("unknown command: {} (try `help`)", other)),
        }
    }
}

pub enum CommandResult {
    Lines(Vec<String>),
    Quit,
}

pub struct Shell {
    session: Session,
    undo: Option<UndoToken>,
}

impl Shell {
    pub fn new(session: Session) -> Self {
        Self { session, undo: None }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn execute(&mut self, command: Command) -> Result<CommandResult> {
        let lines = match command {
            Command::List => self.list(),
            Command::Resolve(user) => {
                let id = self.session.open_direct(&user);
                vec![format!("conversation {}", id)]
            }
            Command::Open(id) => {
                let groups = self.session.open_conversation(&id).await?;
                format_groups(&groups)
            }
            Command::Send {
                conversation_id,
                text,
            } => {
                let message = self.session.send_message(&conversation_id, &text).await?;
                vec![format!("sent {} to {}", message.id, message.conversation_id)]
            }
            Command::Groups(id) => format_groups(&self.session.groups(&id)),
            Command::Press(id) => {
                self.session.selection().long_press(&id);
                self.selection_status()
            }
            Command::Select(id) => {
                self.session.selection().toggle(&id);
                self.selection_status()
            }
            Command::Archive => {
                let token = self.session.selection().bulk_archive();
                self.offer_undo(token)
            }
            Command::Delete => {
                let token = self.session.selection().bulk_delete();
                self.offer_undo(token)
            }
            Command::Swipe { id, direction } => self.swipe(id, direction),
            Command::Undo => match self.undo.take() {
                Some(token) if token.is_offered() => {
                    let restored = self.session.selection().undo(token);
                    vec![format!("restored {}", restored)]
                }
                _ => vec!["nothing to undo".to_string()],
            },
            Command::Help => HELP.lines().map(str::to_string).collect(),
            Command::Quit => return Ok(CommandResult::Quit),
        };
        Ok(CommandResult::Lines(lines))
    }

    fn list(&self) -> Vec<String> {
        let store = self.session.store();
        let mut lines: Vec<String> = store.visible().iter().map(format_row).collect();
        let archived = store.archived();
        if !archived.is_empty() {
            lines.push(format!("archived ({})", archived.len()));
            lines.extend(archived.iter().map(format_row));
        }
        if lines.is_empty() {
            lines.push("no conversations".to_string());
        }
        lines
    }

    fn selection_status(&mut self) -> Vec<String> {
        let selection = self.session.selection();
        if selection.is_selection_mode() {
            vec![format!("selected: {}", selection.selected().join(", "))]
        } else {
            vec!["selection cleared".to_string()]
        }
    }

    fn swipe(&mut self, id: String, direction: SwipeDirection) -> Vec<String> {
        let config = self.session.settings().swipe;
        let offset = match direction {
            SwipeDirection::Left => -SWIPE_COMMIT_DISTANCE,
            SwipeDirection::Right => SWIPE_COMMIT_DISTANCE,
        };

        let selection = self.session.selection();
        let mut row = SwipeRow::new(id);
        if selection.begin_swipe(&mut row) {
            row.drag_to(offset);
        }
        match selection.release_swipe(&mut row, &config) {
            SwipeOutcome::Executed { undo, .. } => self.offer_undo(undo),
            SwipeOutcome::Closed => vec!["nothing to do".to_string()],
            SwipeOutcome::Ignored => vec!["swipes are off while selecting".to_string()],
        }
    }

    fn offer_undo(&mut self, token: Option<UndoToken>) -> Vec<String> {
        match token {
            Some(token) => {
                let line = format!("{} affected, `undo` to reverse", token.len());
                self.undo = Some(token);
                vec![line]
            }
            None => vec!["nothing changed".to_string()],
        }
    }

    /// Read commands from stdin until `quit` or EOF, printing notices as
    /// they arrive. Logs the session out on the way out.
    pub async fn run(mut self, mut notices: mpsc::UnboundedReceiver<Notice>) -> Result<()> {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();
        stdout.write_all(b"type `help` for commands\n").await?;

        loop {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;

            let line = tokio::select! {
                line = stdin.next_line() => line?,
                Some(notice) = notices.recv() => {
                    stdout.write_all(format!("\n{}\n", format_notice(&notice)).as_bytes()).await?;
                    continue;
                }
            };
            let Some(line) = line else { break };

            let command = match Command::parse(&line) {
                Ok(command) => command,
                Err(e) if e.is_empty() => continue,
                Err(e) => {
                    stdout.write_all(format!("{}\n", e).as_bytes()).await?;
                    continue;
                }
            };

            match self.execute(command).await {
                Ok(CommandResult::Lines(lines)) => {
                    for line in lines {
                        stdout.write_all(format!("{}\n", line).as_bytes()).await?;
                    }
                }
                Ok(CommandResult::Quit) => break,
                Err(e) => {
                    tracing::error!("Command failed: {:#}", e);
                    stdout.write_all(format!("error: {:#}\n", e).as_bytes()).await?;
                }
            }
        }

        self.session.logout().await
    }
}

fn format_row(conversation: &Conversation) -> String {
    let mut line = format!("{}  {}", conversation.id(), conversation.name);
    if conversation.is_pending() {
        line.push_str("  (connecting)");
    }
    if conversation.unread_count > 0 {
        line.push_str(&format!("  [{}]", conversation.unread_count));
    }
    if let Some(last) = &conversation.last_message {
        line.push_str(&format!("  \"{}\"", last));
    }
    line
}

fn format_groups(groups: &[MessageGroup]) -> Vec<String> {
    if groups.is_empty() {
        return vec!["no messages".to_string()];
    }
    let mut lines = Vec::new();
    for group in groups {
        let who = if group.is_sent {
            "you".to_string()
        } else if group.is_ai_group {
            format!("{} (ai)", group.sender_id)
        } else {
            group.sender_id.clone()
        };
        lines.push(format!("{}:", who));
        for message in &group.messages {
            lines.push(format!("  {} {}", message.timestamp.format("%H:%M"), message.text));
        }
    }
    lines
}

fn format_notice(notice: &Notice) -> String {
    match notice.level {
        NoticeLevel::Info => format!("* {}", notice.text),
        NoticeLevel::Error => format!("! {}", notice.text),
    }
}
