//! Interactive client console
//!
//! Reads commands line by line, checks what it can locally and forwards the rest
//! to the server through a [`Client`].

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use crate::graph::{self, text, Graph};
use crate::network::{Client, ClientError, Response};

/// Command list printed by `help` before the server's own text
pub const LOCAL_HELP: &str = "Available commands:\n\
    \x20 help           - show this help and the server's command list\n\
    \x20 input          - enter a graph by hand, finished by an empty line\n\
    \x20 load <path>    - read a graph description from a file\n\
    \x20 query <u> <v>  - shortest path from vertex u to vertex v\n\
    \x20 exit           - end the session\n";

const INPUT_FORMAT: &str = "Input format:\n\
    \x20 line 1: <vertices> <edges>\n\
    \x20 then one line per vertex with <edges> values of 0 or 1\n\
    \x20 then one line with <edges> weights\n\
    \x20 finish with an empty line\n";

/// One parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Input,
    Load(PathBuf),
    Query { source: u16, target: u16 },
    Exit,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command '{0}'. Type help for the command list.")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid vertex '{0}'")]
    InvalidVertex(String),
}

/// Parse one non-empty console line
pub fn parse_command(line: &str) -> Result<ConsoleCommand, CommandError> {
    let mut tokens = line.split_whitespace();
    let name = tokens.next().unwrap_or_default();
    let args: Vec<&str> = tokens.collect();

    match (name, args.as_slice()) {
        ("help", []) => Ok(ConsoleCommand::Help),
        ("input", []) => Ok(ConsoleCommand::Input),
        ("exit", []) => Ok(ConsoleCommand::Exit),
        ("load", [path]) => Ok(ConsoleCommand::Load(PathBuf::from(path))),
        ("load", _) => Err(CommandError::Usage("load <path>")),
        ("query", [source, target]) => Ok(ConsoleCommand::Query {
            source: parse_vertex(source)?,
            target: parse_vertex(target)?,
        }),
        ("query", _) => Err(CommandError::Usage("query <u> <v>")),
        ("help", _) => Err(CommandError::Usage("help")),
        ("input", _) => Err(CommandError::Usage("input")),
        ("exit", _) => Err(CommandError::Usage("exit")),
        (other, _) => Err(CommandError::Unknown(other.to_string())),
    }
}

fn parse_vertex(token: &str) -> Result<u16, CommandError> {
    token
        .parse()
        .map_err(|_| CommandError::InvalidVertex(token.to_string()))
}

/// Check a query against the graph this console uploaded
pub fn check_query(uploaded: Option<u16>, source: u16, target: u16) -> Result<(), String> {
    let vertex_count = uploaded.ok_or("Upload a graph first (input or load).")?;
    if source >= vertex_count || target >= vertex_count {
        return Err(format!(
            "Vertices must be in range [0, {}].",
            vertex_count.saturating_sub(1)
        ));
    }
    Ok(())
}

enum Flow {
    Continue,
    Stop,
}

/// Line-oriented client front end
pub struct Console<R, W> {
    client: Client,
    lines: Lines<R>,
    out: W,
    /// Vertex count of the graph the server accepted from us
    uploaded: Option<u16>,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(client: Client, input: R, out: W) -> Self {
        Self {
            client,
            lines: input.lines(),
            out,
            uploaded: None,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Vertex count of the uploaded graph, if any
    pub fn uploaded(&self) -> Option<u16> {
        self.uploaded
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Run until `exit`, end of input, or loss of the server
    pub async fn run(&mut self) -> Result<()> {
        loop {
            write!(self.out, "> ")?;
            self.out.flush()?;

            let Some(line) = self.lines.next_line().await? else {
                writeln!(self.out)?;
                self.execute(ConsoleCommand::Exit).await?;
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let command = match parse_command(line) {
                Ok(command) => command,
                Err(e) => {
                    writeln!(self.out, "{}", e)?;
                    continue;
                }
            };

            if let Flow::Stop = self.execute(command).await? {
                break;
            }
        }
        Ok(())
    }

    async fn execute(&mut self, command: ConsoleCommand) -> Result<Flow> {
        let outcome = match command {
            ConsoleCommand::Help => {
                write!(self.out, "{}", LOCAL_HELP)?;
                self.client.help().await
            }
            ConsoleCommand::Input => {
                write!(self.out, "{}", INPUT_FORMAT)?;
                let description = self.read_block().await?;
                match text::parse_graph(&description) {
                    Ok(graph) => return self.upload(graph).await,
                    Err(e) => {
                        writeln!(self.out, "Input error: {}", e)?;
                        return Ok(Flow::Continue);
                    }
                }
            }
            ConsoleCommand::Load(path) => match text::load_graph(&path) {
                Ok(graph) => return self.upload(graph).await,
                Err(e) => {
                    writeln!(self.out, "Cannot load {}: {}", path.display(), e)?;
                    return Ok(Flow::Continue);
                }
            },
            ConsoleCommand::Query { source, target } => {
                if let Err(message) = check_query(self.uploaded, source, target) {
                    writeln!(self.out, "{}", message)?;
                    return Ok(Flow::Continue);
                }
                self.client.query(source, target).await
            }
            ConsoleCommand::Exit => {
                let outcome = self.client.exit().await;
                match outcome {
                    Ok(response) => self.show(&response)?,
                    Err(e) => writeln!(self.out, "Exit not confirmed: {}", e)?,
                }
                writeln!(self.out, "Client shutting down.")?;
                return Ok(Flow::Stop);
            }
        };

        self.settle(outcome)
    }

    async fn upload(&mut self, graph: Graph) -> Result<Flow> {
        if let Err(e) = graph::validate(&graph) {
            writeln!(self.out, "Validation failed: {}", e)?;
            return Ok(Flow::Continue);
        }

        let outcome = self.client.upload_graph(&graph).await;
        if let Ok(Response::Text(_)) = outcome {
            self.uploaded = Some(graph.vertex_count());
        }
        self.settle(outcome)
    }

    /// Print a server outcome and decide whether the session goes on
    fn settle(&mut self, outcome: Result<Response, ClientError>) -> Result<Flow> {
        match outcome {
            Ok(response) => {
                self.show(&response)?;
                Ok(Flow::Continue)
            }
            Err(e) if e.is_unreachable() => {
                tracing::warn!("Server unreachable: {}", e);
                writeln!(self.out, "Lost contact with the server.")?;
                Ok(Flow::Stop)
            }
            Err(e @ ClientError::Connection(_)) | Err(e @ ClientError::NotConnected) => {
                tracing::warn!("Connection lost: {}", e);
                writeln!(self.out, "Connection to the server was lost.")?;
                Ok(Flow::Stop)
            }
            Err(e) => {
                writeln!(self.out, "Request failed: {}", e)?;
                Ok(Flow::Continue)
            }
        }
    }

    fn show(&mut self, response: &Response) -> Result<()> {
        match response {
            Response::Text(text) => writeln!(self.out, "{}", text.trim_end())?,
            Response::Path(result) => {
                let path: Vec<String> = result.path.iter().map(|v| v.to_string()).collect();
                writeln!(self.out, "Distance: {}", result.distance)?;
                writeln!(self.out, "Path: {}", path.join(" -> "))?;
            }
            Response::Rejected { status, message } => {
                writeln!(self.out, "Server error ({:?}): {}", status, message)?;
            }
        }
        Ok(())
    }

    /// Collect lines up to the first empty one (or end of input)
    async fn read_block(&mut self) -> Result<String> {
        let mut block = String::new();
        while let Some(line) = self.lines.next_line().await? {
            if line.trim().is_empty() {
                break;
            }
            block.push_str(&line);
            block.push('\n');
        }
        Ok(block)
    }
}
