#![forbid(unsafe_code)]

//! `agent-relay-ctl` — local CLI companion for `agent-relay`.
//!
//! Connects to the IPC socket, sends one JSON command, and prints the
//! `data` payload of the response.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(
    name = "agent-relay-ctl",
    about = "Local CLI for an agent-relay instance",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the instance's `ipc_name`).
    #[arg(long, default_value = "agent-relay")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Spawn an interactive process in the instance's working directory.
    Spawn {
        /// Shell command line.
        cmd: String,
        /// Line written to stdin right after start.
        #[arg(long)]
        input: Option<String>,
    },

    /// Send one line to a process's stdin.
    Input {
        /// Process handle.
        handle: u64,
        /// Text to send (a newline is appended).
        text: String,
    },

    /// Close a process's stdin.
    Close {
        /// Process handle.
        handle: u64,
    },

    /// Print everything a process has written so far.
    Output {
        /// Process handle.
        handle: u64,
    },

    /// List live processes.
    List,

    /// Terminate a process.
    Kill {
        /// Process handle.
        handle: u64,
    },

    /// Ask the agent and wait for the final answer.
    Ask {
        /// Prompt text.
        prompt: String,
        /// Conversation id to resume.
        #[arg(long)]
        session_id: Option<String>,
        /// Resume the most recent conversation.
        #[arg(long = "continue")]
        continue_latest: bool,
    },

    /// Cancel the in-flight agent invocation.
    Cancel,

    /// Start a sibling instance bound to another directory.
    Relaunch {
        /// Directory the sibling runs in.
        dir: PathBuf,
    },
}

impl Command {
    fn to_request(&self) -> Value {
        match self {
            Self::Spawn { cmd, input } => {
                let mut req = json!({ "command": "spawn", "cmd": cmd });
                if let Some(text) = input {
                    req["input"] = Value::String(text.clone());
                }
                req
            }
            Self::Input { handle, text } => {
                json!({ "command": "input", "handle": handle, "text": text })
            }
            Self::Close { handle } => json!({ "command": "close", "handle": handle }),
            Self::Output { handle } => json!({ "command": "output", "handle": handle }),
            Self::List => json!({ "command": "list" }),
            Self::Kill { handle } => json!({ "command": "kill", "handle": handle }),
            Self::Ask {
                prompt,
                session_id,
                continue_latest,
            } => {
                let mut req = json!({
                    "command": "ask",
                    "prompt": prompt,
                    "continue": continue_latest,
                });
                if let Some(id) = session_id {
                    req["session_id"] = Value::String(id.clone());
                }
                req
            }
            Self::Cancel => json!({ "command": "cancel" }),
            Self::Relaunch { dir } => {
                // Resolve relative paths against the caller, not the instance.
                let dir = dir.canonicalize().unwrap_or_else(|_| dir.clone());
                json!({ "command": "relaunch", "dir": dir.to_string_lossy() })
            }
        }
    }
}

fn main() {
    let args = Cli::parse();
    let request_json = args.command.to_request();

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj.get("ok").and_then(Value::as_bool).unwrap_or(false);
                if ok {
                    match obj.get("data") {
                        Some(Value::Object(data)) if data.contains_key("output") => {
                            print!("{}", data["output"].as_str().unwrap_or_default());
                        }
                        Some(Value::Object(data)) if data.contains_key("final_text") => {
                            println!("{}", data["final_text"].as_str().unwrap_or_default());
                        }
                        Some(data) => {
                            println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
                        }
                        None => println!("OK"),
                    }
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to agent-relay: {err}");
            eprintln!("Is agent-relay running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

/// Connect to the IPC socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &Value,
) -> std::result::Result<Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
