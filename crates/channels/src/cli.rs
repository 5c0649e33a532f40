//! CLI transport — interactive terminal-based chat.
//!
//! Reads lines from stdin and prints deliveries to stdout. Slash commands
//! stand in for the buttons a chat platform would attach to bot messages;
//! they always target the most recently delivered message.

use async_trait::async_trait;
use rustedchat_core::error::ChannelError;
use rustedchat_core::session::{ChatId, MessageId};
use rustedchat_core::transport::{ButtonCommand, InboundEvent, Transport};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The terminal is a single chat.
pub const CLI_CHAT_ID: ChatId = ChatId(0);

/// What a line of input turned into.
#[derive(Debug, PartialEq)]
pub enum ParsedLine {
    Empty,
    Exit,
    Event(InboundEvent),
    /// `/import PATH`: read an exported session from disk.
    Import(String),
    Unknown(String),
}

/// Parse one input line. `last_id` is the newest delivered message.
pub fn parse_line(line: &str, speaker: &str, last_id: MessageId) -> ParsedLine {
    let line = line.trim();
    if line.is_empty() {
        return ParsedLine::Empty;
    }
    if matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q") {
        return ParsedLine::Exit;
    }

    let Some(command) = line.strip_prefix('/') else {
        return ParsedLine::Event(InboundEvent::Message {
            chat_id: CLI_CHAT_ID,
            text: line.to_string(),
            speaker: speaker.to_string(),
        });
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    if name == "import" {
        if arg.is_empty() {
            return ParsedLine::Unknown(line.to_string());
        }
        return ParsedLine::Import(arg.to_string());
    }

    let button = match (name, arg) {
        ("continue", "") => ButtonCommand::Continue,
        ("regen", "") => ButtonCommand::Regenerate,
        ("next", "") => ButtonCommand::Next,
        ("impersonate", "") => ButtonCommand::Impersonate,
        ("delword", "") => ButtonCommand::DeleteWord,
        ("cutoff", "") => ButtonCommand::Cutoff,
        ("reset", "") => ButtonCommand::Reset,
        ("options", "") => ButtonCommand::Options,
        ("models", "") => ButtonCommand::ModelList,
        ("export", "") => ButtonCommand::Download,
        ("model", index) => match index.parse() {
            Ok(index) => ButtonCommand::LoadModel(index),
            Err(_) => return ParsedLine::Unknown(line.to_string()),
        },
        ("char", id) if !id.is_empty() => ButtonCommand::LoadCharacter(id.to_string()),
        _ => return ParsedLine::Unknown(line.to_string()),
    };

    ParsedLine::Event(InboundEvent::Button {
        chat_id: CLI_CHAT_ID,
        message_id: last_id,
        command: button,
        speaker: speaker.to_string(),
    })
}

/// Interactive CLI transport for terminal-based chat.
pub struct CliTransport {
    speaker: String,
    next_id: AtomicI64,
    last_sent: Arc<AtomicI64>,
}

impl CliTransport {
    pub fn new(speaker: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            next_id: AtomicI64::new(1),
            last_sent: Arc::new(AtomicI64::new(0)),
        }
    }

    fn next_message_id(&self) -> MessageId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.last_sent.store(id, Ordering::SeqCst);
        MessageId(id)
    }
}

impl Default for CliTransport {
    fn default() -> Self {
        Self::new("")
    }
}

#[async_trait]
impl Transport for CliTransport {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundEvent, ChannelError>>, ChannelError> {
        debug!("CLI transport listening on stdin");
        let (tx, rx) = mpsc::channel(32);
        let speaker = self.speaker.clone();
        let last_sent = Arc::clone(&self.last_sent);

        tokio::spawn(async move {
            let stdin = io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let last_id = MessageId(last_sent.load(Ordering::SeqCst));
                        match parse_line(&line, &speaker, last_id) {
                            ParsedLine::Empty => continue,
                            ParsedLine::Exit => break,
                            ParsedLine::Unknown(cmd) => {
                                warn!(command = %cmd, "Unknown command");
                                println!(
                                    "unknown command {cmd}; try /continue /regen /next \
                                     /impersonate /delword /cutoff /reset /options /models \
                                     /model N /char ID /export /import PATH"
                                );
                            }
                            ParsedLine::Import(path) => {
                                let event = match tokio::fs::read_to_string(&path).await {
                                    Ok(content) => InboundEvent::Document {
                                        chat_id: CLI_CHAT_ID,
                                        file_name: path,
                                        content,
                                    },
                                    Err(e) => {
                                        println!("cannot read {path}: {e}");
                                        continue;
                                    }
                                };
                                if tx.send(Ok(event)).await.is_err() {
                                    break;
                                }
                            }
                            ParsedLine::Event(event) => {
                                if tx.send(Ok(event)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(None) => break, // EOF (Ctrl+D)
                    Err(e) => {
                        let _ = tx
                            .send(Err(ChannelError::ConnectionLost(e.to_string())))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(&self, _chat_id: ChatId, text: &str) -> Result<MessageId, ChannelError> {
        let id = self.next_message_id();
        println!("[{id}] {text}");
        Ok(id)
    }

    async fn send_image(&self, _chat_id: ChatId, prompt: &str) -> Result<MessageId, ChannelError> {
        let id = self.next_message_id();
        println!("[{id}] (image) {prompt}");
        Ok(id)
    }

    async fn notice(&self, _chat_id: ChatId, text: &str) -> Result<(), ChannelError> {
        println!("-- {text}");
        Ok(())
    }

    async fn edit(
        &self,
        _chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), ChannelError> {
        println!("[{message_id}] (edited) {text}");
        Ok(())
    }

    async fn delete(&self, _chat_id: ChatId, message_id: MessageId) -> Result<(), ChannelError> {
        println!("[{message_id}] (deleted)");
        Ok(())
    }
}
