//! Relay CLI - 制御ポート用のコマンドラインインターフェース
//!
//! 実行中のエージェントの制御リスナーに制御トークンを送ります。

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use relay_debug::ControlCommand;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use tracing::{debug, info};

/// Relay - remote test-execution debugger control
#[derive(Parser)]
#[command(name = "relay")]
#[command(version = "0.1.0")]
#[command(about = "Send control commands to a running debugging agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: ControlMode,
}

#[derive(Subcommand)]
enum ControlMode {
    /// Send a single control token
    Send {
        /// Host of the agent's control listener
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Control port reported by the agent
        #[arg(short, long)]
        port: u16,

        /// One of: kill, pause, resume, step_next, step_over,
        /// pause_on_failure, do_not_pause_on_failure
        token: String,
    },

    /// Open an interactive control prompt
    Repl {
        /// Host of the agent's control listener
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Control port reported by the agent
        #[arg(short, long)]
        port: u16,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        ControlMode::Send { host, port, token } => {
            let command: ControlCommand = token.parse()?;
            send_command(&host, port, command)?;
            println!("Sent '{}' to {}:{}", command, host, port);
        }
        ControlMode::Repl { host, port } => run_repl(&host, port)?,
    }

    Ok(())
}

/// 制御トークンを1接続で送る
///
/// リスナーはEOFまで読むので、書き込み後に送信側を閉じます。
fn send_command(host: &str, port: u16, command: ControlCommand) -> Result<()> {
    let mut stream = TcpStream::connect((host, port))
        .with_context(|| format!("failed to connect to control port {}:{}", host, port))?;
    stream.write_all(command.as_str().as_bytes())?;
    stream.shutdown(Shutdown::Write)?;
    debug!("sent '{}' to {}:{}", command, host, port);
    Ok(())
}

/// REPLの1行の解釈結果
#[derive(Debug, PartialEq, Eq)]
enum ReplInput {
    Empty,
    Help,
    Quit,
    Command(ControlCommand),
}

fn parse_line(line: &str) -> Result<ReplInput> {
    let line = line.trim();
    match line {
        "" => Ok(ReplInput::Empty),
        "help" | "h" => Ok(ReplInput::Help),
        "quit" | "exit" | "q" => Ok(ReplInput::Quit),
        _ => match ControlCommand::parse(line) {
            Some(command) => Ok(ReplInput::Command(command)),
            None => bail!("Unknown command: {}", line),
        },
    }
}

/// REPLループを実行する
fn run_repl(host: &str, port: u16) -> Result<()> {
    info!("controlling agent at {}:{}", host, port);
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("(relay) ");
        match readline {
            Ok(line) => {
                let input = match parse_line(&line) {
                    Ok(input) => input,
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        println!("Type 'help' for available commands.");
                        continue;
                    }
                };
                if input != ReplInput::Empty {
                    rl.add_history_entry(line.trim())?;
                }

                match input {
                    ReplInput::Empty => {}
                    ReplInput::Help => print_help(),
                    ReplInput::Quit => {
                        println!("Goodbye!");
                        break;
                    }
                    ReplInput::Command(command) => {
                        if let Err(e) = send_command(host, port, command) {
                            eprintln!("Error: {:#}", e);
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help (h)                - Show this help message");
    println!("  quit/exit/q             - Exit the prompt");
    println!();
    println!("Control commands:");
    for command in ControlCommand::ALL {
        println!("  {}", command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("  ").unwrap(), ReplInput::Empty);
        assert_eq!(parse_line("help").unwrap(), ReplInput::Help);
        assert_eq!(parse_line("q").unwrap(), ReplInput::Quit);
        assert_eq!(
            parse_line("step_over\n").unwrap(),
            ReplInput::Command(ControlCommand::StepOver)
        );
        assert!(parse_line("continue").is_err());
    }

    #[test]
    fn test_send_command_writes_single_token() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let receiver = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut token = String::new();
            stream.read_to_string(&mut token).unwrap();
            token
        });

        send_command("127.0.0.1", port, ControlCommand::PauseOnFailure).unwrap();
        assert_eq!(receiver.join().unwrap(), "pause_on_failure");
    }
}
