//! Tsunagi CLI - コマンドラインインターフェース
//!
//! jdbを子プロセスとして駆動するデバッガブリッジ tsunagi のREPLインターフェース

use anyhow::Result;
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::ffi::OsString;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tsunagi_core::{
    BreakpointLocation, BreakpointManager, BridgeConfig, Command, DebugBridge, SessionState,
    Target,
};

/// 型付きの結果を待つ時間
const RESULT_TIMEOUT: Duration = Duration::from_secs(5);

/// 実行を進めてから状態を読み直すまでの間隔
const REFRESH_DELAY: Duration = Duration::from_millis(300);

/// Tsunagi - jdb Debugger Bridge
#[derive(Parser)]
#[command(name = "tsunagi")]
#[command(version = "0.1.0")]
#[command(about = "Drive jdb and read its output as structured results", long_about = None)]
struct Cli {
    /// Debugger executable
    #[arg(long, default_value = "jdb", global = true)]
    jdb: OsString,

    /// Milliseconds to wait after `exit` before killing the debugger
    #[arg(long, default_value_t = 200, global = true)]
    stop_grace_ms: u64,

    /// Breakpoints to set once connected (Class:line or Class.method)
    #[arg(short, long = "break", global = true)]
    breakpoints: Vec<String>,

    /// Do not echo raw debugger output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Show threads, stack and locals after continue/step/next/finish/suspend
    #[arg(long, global = true)]
    auto_refresh: bool,

    #[command(subcommand)]
    command: DebugCommand,
}

#[derive(Subcommand)]
enum DebugCommand {
    /// Attach to a JVM started with a JDWP socket agent
    Attach {
        /// Host name of the debuggee
        #[arg(long, default_value = "localhost")]
        host: String,

        /// JDWP port
        #[arg(short, long, default_value_t = tsunagi_core::DEFAULT_JDWP_PORT)]
        port: u16,
    },

    /// Let jdb launch a main class
    Launch {
        /// Fully qualified main class
        main_class: String,

        /// Class path passed to jdb
        #[arg(long)]
        classpath: Option<String>,

        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

impl DebugCommand {
    fn into_target(self) -> Target {
        match self {
            DebugCommand::Attach { host, port } => Target::attach(host, port),
            DebugCommand::Launch {
                main_class,
                classpath,
                args,
            } => Target::Launch {
                main_class,
                classpath,
                args,
            },
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    println!("Tsunagi - jdb Debugger Bridge");
    println!("Version 0.1.0");
    println!();

    let cli = Cli::parse();
    let auto_refresh = cli.auto_refresh;
    let mut breakpoints = BreakpointManager::new();
    let bridge = init_bridge(cli, &mut breakpoints)?;
    run_repl(&bridge, &mut breakpoints, auto_refresh)?;
    bridge.stop();

    Ok(())
}

/// ブリッジを作成してデバッガに接続する
fn init_bridge(cli: Cli, breakpoints: &mut BreakpointManager) -> Result<DebugBridge> {
    let config = BridgeConfig {
        debugger: cli.jdb,
        stop_grace: Duration::from_millis(cli.stop_grace_ms),
        ..BridgeConfig::default()
    };
    let quiet = cli.quiet;
    let bridge = DebugBridge::new(config, move |line: &str| {
        if line.starts_with("[jdb]") {
            eprintln!("{}", line);
        } else if !quiet {
            println!("{}", line);
        }
    });

    let target = cli.command.into_target();
    println!("Connecting: {}", target);
    bridge.connect(&target);
    if bridge.state() != SessionState::Ready {
        anyhow::bail!("Could not start the debugger for {}", target);
    }

    for raw in &cli.breakpoints {
        match BreakpointLocation::parse(raw) {
            Some(location) => {
                breakpoints.add(location);
            }
            None => eprintln!("Ignoring invalid breakpoint: {}", raw),
        }
    }
    let applied = breakpoints.apply_all(&bridge);
    if applied > 0 {
        println!("Applied {} breakpoint(s)", applied);
    }
    println!();

    Ok(bridge)
}

/// REPLループを実行する
fn run_repl(
    bridge: &DebugBridge,
    breakpoints: &mut BreakpointManager,
    auto_refresh: bool,
) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("(tsunagi) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                if !handle_command(bridge, breakpoints, line, auto_refresh) {
                    println!("Goodbye!");
                    break;
                }
                if bridge.state() == SessionState::Terminated {
                    println!("Debugger session ended");
                    break;
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

/// 1行分のコマンドを処理する。終了するときは `false`
fn handle_command(
    bridge: &DebugBridge,
    breakpoints: &mut BreakpointManager,
    line: &str,
    auto_refresh: bool,
) -> bool {
    match Command::parse(line) {
        Some(Command::Help) => print_help(),
        Some(Command::Quit) => return false,
        Some(Command::Break(location)) => handle_break(bridge, breakpoints, location),
        Some(Command::Clear(location)) => handle_clear(bridge, breakpoints, &location),
        Some(Command::Threads) => handle_threads(bridge),
        Some(Command::Backtrace) => handle_backtrace(bridge),
        Some(Command::Locals) => handle_locals(bridge),
        Some(command) if command.advances_execution() => {
            bridge.send(&command.to_string());
            if auto_refresh {
                refresh_all(bridge);
            }
        }
        Some(command) => bridge.send(&command.to_string()),
        None => handle_custom_command(bridge, breakpoints, line),
    }
    true
}

/// Breakコマンドを処理する
fn handle_break(bridge: &DebugBridge, breakpoints: &mut BreakpointManager, location: BreakpointLocation) {
    bridge.send(&location.set_command());
    let id = breakpoints.add(location.clone());
    println!("Breakpoint {} set at {}", id, location);
}

/// Clearコマンドを処理する
fn handle_clear(bridge: &DebugBridge, breakpoints: &mut BreakpointManager, location: &BreakpointLocation) {
    bridge.send(&location.clear_command());
    match breakpoints.find(location).map(|bp| bp.id) {
        Some(id) => {
            breakpoints.remove(id);
            println!("Breakpoint {} cleared", id);
        }
        None => println!("No breakpoint recorded at {}", location),
    }
}

/// 結果が届くまで待つ
fn wait_result<T>(rx: mpsc::Receiver<T>) -> Option<T> {
    match rx.recv_timeout(RESULT_TIMEOUT) {
        Ok(result) => Some(result),
        Err(_) => {
            println!("No response from the debugger");
            None
        }
    }
}

/// 実行を進めた後、スレッド・スタック・ローカル変数を表示し直す
fn refresh_all(bridge: &DebugBridge) {
    thread::sleep(REFRESH_DELAY);
    if !bridge.is_ready() {
        return;
    }
    handle_threads(bridge);
    handle_backtrace(bridge);
    handle_locals(bridge);
}

fn handle_threads(bridge: &DebugBridge) {
    let (tx, rx) = mpsc::channel();
    bridge.request_threads(move |threads| {
        let _ = tx.send(threads);
    });
    let Some(threads) = wait_result(rx) else {
        return;
    };
    if threads.is_empty() {
        println!("No threads found");
        return;
    }
    println!("Threads ({} found):", threads.len());
    for thread in &threads {
        println!("  {:<12} {}", thread.id, thread.raw_line);
    }
}

fn handle_backtrace(bridge: &DebugBridge) {
    let (tx, rx) = mpsc::channel();
    bridge.request_frames(move |frames| {
        let _ = tx.send(frames);
    });
    let Some(frames) = wait_result(rx) else {
        return;
    };
    if frames.is_empty() {
        println!("No frames on the current call stack");
        return;
    }
    for frame in &frames {
        println!("  #{} {}", frame.index, frame.description);
    }
}

fn handle_locals(bridge: &DebugBridge) {
    let (tx, rx) = mpsc::channel();
    bridge.request_locals(move |locals| {
        let _ = tx.send(locals);
    });
    let Some(locals) = wait_result(rx) else {
        return;
    };
    if locals.is_empty() {
        println!("No local variables");
        return;
    }
    for var in &locals {
        println!("  {} = {}", var.name, var.value);
    }
}

/// カスタムコマンドを処理する
fn handle_custom_command(bridge: &DebugBridge, breakpoints: &mut BreakpointManager, line: &str) {
    if line == "breakpoints" || line == "info" {
        print_breakpoints(breakpoints);
    } else if let Some(id) = line.strip_prefix("delete ") {
        match id.trim().parse() {
            Ok(id) => match breakpoints.remove(id) {
                Some(bp) => {
                    bridge.send(&bp.location.clear_command());
                    println!("Breakpoint {} deleted", id);
                }
                None => println!("No breakpoint {}", id),
            },
            Err(_) => println!("Invalid breakpoint id: {}", id),
        }
    } else {
        // 知らないコマンドはそのままjdbに渡す
        bridge.send(line);
    }
}

fn print_breakpoints(breakpoints: &BreakpointManager) {
    if breakpoints.count() == 0 {
        println!("No breakpoints");
        return;
    }
    println!("Breakpoints ({}):", breakpoints.count());
    for bp in breakpoints.all() {
        println!("  {}. {}", bp.id, bp.location);
    }
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help           - Show this help message");
    println!("  quit/exit/q    - Stop the debugger and exit");
    println!();
    println!("Execution:");
    println!("  continue (c)   - Resume the stopped thread");
    println!("  step (s)       - Step into the next line");
    println!("  next (n)       - Step over the next line");
    println!("  finish (f)     - Run until the current method returns");
    println!("  suspend/resume - Suspend or resume all threads");
    println!();
    println!("Inspection:");
    println!("  threads        - List threads");
    println!("  thread <id>    - Select the current thread");
    println!("  where (bt)     - Show the call stack");
    println!("  up/down [n]    - Move between frames");
    println!("  locals (l)     - Show local variables");
    println!("  print <expr>   - Evaluate an expression");
    println!();
    println!("Breakpoints:");
    println!("  break <loc>    - Set breakpoint at Class:line or Class.method");
    println!("  clear <loc>    - Clear breakpoint at a location");
    println!("  delete <id>    - Delete breakpoint by id");
    println!("  breakpoints    - List breakpoints");
    println!();
    println!("Anything else is sent to jdb as is.");
    println!();
    println!("Examples:");
    println!("  break com.example.Main:12");
    println!("  break com.example.Main.main");
    println!("  print args.length");
}
