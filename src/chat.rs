// Interactive terminal session over the conversation engine.
// The in-process counterpart of the web UI: same engine, state held here.

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::engine::{ConversationEngine, WorkflowState};
use crate::llm_interaction::ChatMessage;

const HELP: &str = "Describe your business request. Commands: /reset starts over, /state shows the current phase, /quit exits.";

/// Session-local history. A projection of engine outputs, dropped on reset.
#[derive(Debug, Default)]
pub struct ChatSession {
    pub state: WorkflowState,
    pub transcript: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn reset(&mut self, engine: &ConversationEngine) {
        self.state = engine.reset();
        self.transcript.clear();
    }
}

/// Read lines from `input` until EOF or `/quit`, answering on `output`.
pub async fn run_chat_session<R, W>(engine: &ConversationEngine, input: R, mut output: W) -> Result<ChatSession>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("Starting chat session...");
    let mut session = ChatSession::default();
    let mut lines = input.lines();

    output.write_all(format!("{}\n", HELP).as_bytes()).await?;
    loop {
        output.write_all(b"you> ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                session.reset(engine);
                output.write_all(b"Conversation reset.\n").await?;
                continue;
            }
            "/state" => {
                output
                    .write_all(format!("phase: {}\n", session.state.phase.as_str()).as_bytes())
                    .await?;
                continue;
            }
            _ => {}
        }

        match engine.handle_turn(line, &session.state).await {
            Ok(reply) => {
                session.transcript.push(ChatMessage::user(line));
                for message in &reply.assistant_messages {
                    output.write_all(format!("assistant> {}\n\n", message).as_bytes()).await?;
                    session.transcript.push(ChatMessage::assistant(message.as_str()));
                }
                session.state = reply.state;
            }
            Err(e) => {
                warn!(error = %e, "Chat turn failed");
                output
                    .write_all(format!("error> {}\n", e.user_message()).as_bytes())
                    .await?;
            }
        }
    }

    output.write_all(b"\nGoodbye.\n").await?;
    output.flush().await?;
    info!(turns = session.transcript.len(), "Chat session finished");
    Ok(session)
}
