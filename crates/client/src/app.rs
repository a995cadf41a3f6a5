use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use relaychat_storage::{GuardedStorage, SqliteKeyValueStore};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::chat::transport::{RelayClient, TransportError};
use crate::chat::{
    ChatSession, Conversation, ConversationId, Message, MessageId, Role, SubmitRejection,
};
use crate::settings::ClientSettings;

pub const HELP_TEXT: &str = "\
Type a message and press enter to chat.
  /list                  show conversations
  /new                   create and select a conversation
  /select <id>           select a conversation
  /rename <id> <title>   rename a conversation
  /fav <id>              toggle favorite
  /archive <id>          archive or restore
  /history               reprint the transcript
  /help                  show this text
  /quit                  exit";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to build relay transport on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Chat(String),
    List,
    New,
    Select(ConversationId),
    Rename { id: ConversationId, title: String },
    Favorite(ConversationId),
    Archive(ConversationId),
    History,
    Help,
    Quit,
    Usage(&'static str),
    Unknown(String),
}

impl Command {
    /// Parses one input line. Blank lines parse to `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Some(Self::Chat(trimmed.to_string()));
        };

        let (name, argument) = match rest.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (rest, ""),
        };

        let command = match name {
            "list" => Self::List,
            "new" => Self::New,
            "history" => Self::History,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            "select" => with_id(argument, "/select <id>", Self::Select),
            "fav" => with_id(argument, "/fav <id>", Self::Favorite),
            "archive" => with_id(argument, "/archive <id>", Self::Archive),
            "rename" => match argument.split_once(char::is_whitespace) {
                Some((id, title)) => Self::Rename {
                    id: ConversationId::new(id),
                    title: title.trim().to_string(),
                },
                None => Self::Usage("/rename <id> <title>"),
            },
            other => Self::Unknown(other.to_string()),
        };
        Some(command)
    }
}

fn with_id(
    argument: &str,
    usage: &'static str,
    build: impl FnOnce(ConversationId) -> Command,
) -> Command {
    if argument.is_empty() {
        Command::Usage(usage)
    } else {
        build(ConversationId::new(argument))
    }
}

/// Opens the local store, or falls back to storage that keeps nothing.
pub async fn open_storage(database_path: &Path) -> GuardedStorage {
    let location = database_path.to_string_lossy();
    match SqliteKeyValueStore::open(&location).await {
        Ok(store) => {
            tracing::info!(database_url = store.database_url(), "opened local store");
            GuardedStorage::new(Arc::new(store))
        }
        Err(error) => {
            tracing::error!(error = %error, "local store unavailable; chat history will not persist");
            GuardedStorage::detached()
        }
    }
}

/// Builds a hydrated session from client settings.
pub async fn open_session(settings: &ClientSettings) -> AppResult<ChatSession> {
    let transport = RelayClient::new(&settings.relay_url).context(TransportSnafu {
        stage: "open-session-transport",
    })?;
    tracing::info!(chat_url = transport.chat_url(), "relay transport ready");
    let storage = open_storage(&settings.database_path).await;
    Ok(ChatSession::open(storage, Arc::new(transport)))
}

/// Tracks how much of the newest message has reached the terminal.
#[derive(Debug, Default)]
struct DeltaPrinter {
    current: Option<MessageId>,
    printed: usize,
}

impl DeltaPrinter {
    fn render(&mut self, messages: &[Message], out: &mut impl Write) -> std::io::Result<()> {
        let Some(last) = messages.last() else {
            return Ok(());
        };
        if last.role != Role::Assistant {
            return Ok(());
        }

        if self.current.as_ref() != Some(&last.id) {
            if self.current.is_some() {
                writeln!(out)?;
            }
            write!(out, "assistant> ")?;
            self.current = Some(last.id.clone());
            self.printed = 0;
        }

        let unseen = last.content.get(self.printed..).unwrap_or_default();
        out.write_all(unseen.as_bytes())?;
        self.printed = last.content.len();
        out.flush()
    }
}

/// Line-oriented chat front-end over a [`ChatSession`].
pub struct ChatApp {
    session: ChatSession,
}

impl ChatApp {
    pub fn new(session: ChatSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub async fn run<R, W>(&mut self, input: R, mut out: W) -> AppResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        writeln!(out, "relaychat. /help for commands.").context(WriteOutputSnafu {
            stage: "write-banner",
        })?;

        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await.context(ReadInputSnafu {
            stage: "read-input-line",
        })? {
            let Some(command) = Command::parse(&line) else {
                continue;
            };
            if command == Command::Quit {
                break;
            }
            self.execute(command, &mut out).await?;
        }
        Ok(())
    }

    pub async fn execute<W: Write>(&mut self, command: Command, out: &mut W) -> AppResult<()> {
        match command {
            Command::Chat(text) => self.chat(&text, out).await,
            Command::List => self.print_conversations(out),
            Command::New => {
                let id = self.session.create_conversation();
                print_line(out, format!("created and selected {id}"))
            }
            Command::Select(id) => {
                let known = self.session.sidebar().conversations().get(&id).is_some();
                self.session.select_conversation(id.clone());
                if known {
                    print_line(out, format!("selected {id}; the transcript is shared"))
                } else {
                    print_line(out, format!("selected {id}, which is not in the list"))
                }
            }
            Command::Rename { id, title } => {
                if self.session.rename_conversation(&id, &title) {
                    print_line(out, format!("renamed {id}"))
                } else {
                    print_line(out, "title cannot be blank")
                }
            }
            Command::Favorite(id) => {
                self.session.toggle_favorite(&id);
                self.print_conversations(out)
            }
            Command::Archive(id) => {
                self.session.toggle_archive(&id);
                self.print_conversations(out)
            }
            Command::History => self.print_history(out),
            Command::Help => print_line(out, HELP_TEXT),
            Command::Usage(usage) => print_line(out, format!("usage: {usage}")),
            Command::Unknown(name) => print_line(out, format!("unknown command /{name}; try /help")),
            Command::Quit => Ok(()),
        }
    }

    async fn chat<W: Write>(&mut self, text: &str, out: &mut W) -> AppResult<()> {
        let mut printer = DeltaPrinter::default();
        let mut write_error = None;

        let outcome = self
            .session
            .submit(text, |messages| {
                if write_error.is_none() {
                    write_error = printer.render(messages, &mut *out).err();
                }
            })
            .await;

        if let Some(error) = write_error {
            return Err::<(), _>(error).context(WriteOutputSnafu {
                stage: "write-assistant-delta",
            });
        }

        match outcome {
            Ok(_) => print_line(out, ""),
            Err(SubmitRejection::EmptyInput) => Ok(()),
            Err(SubmitRejection::InFlight) => print_line(out, "still waiting for the last reply"),
        }
    }

    fn print_conversations<W: Write>(&self, out: &mut W) -> AppResult<()> {
        let sidebar = self.session.sidebar();
        let active_id = sidebar.active_id();
        let conversations = sidebar.conversations();

        print_line(out, "conversations:")?;
        for conversation in conversations.active() {
            print_line(out, conversation_line(conversation, active_id))?;
        }
        let archived = conversations.archived();
        if !archived.is_empty() {
            print_line(out, "archived:")?;
            for conversation in archived {
                print_line(out, conversation_line(conversation, active_id))?;
            }
        }
        Ok(())
    }

    fn print_history<W: Write>(&self, out: &mut W) -> AppResult<()> {
        for message in self.session.messages() {
            let speaker = match message.role {
                Role::User => "you",
                Role::Assistant => "assistant",
            };
            print_line(out, format!("{speaker}> {}", message.content))?;
        }
        Ok(())
    }
}

fn conversation_line(conversation: &Conversation, active_id: Option<&ConversationId>) -> String {
    let marker = if active_id == Some(&conversation.id) {
        '>'
    } else {
        ' '
    };
    let star = if conversation.is_favorite { " *" } else { "" };
    format!("{marker} {}  {}{star}", conversation.id, conversation.title)
}

fn print_line<W: Write>(out: &mut W, text: impl AsRef<str>) -> AppResult<()> {
    writeln!(out, "{}", text.as_ref()).context(WriteOutputSnafu {
        stage: "write-output-line",
    })
}
