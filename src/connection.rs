//! One accepted connection end to end: read command lines, dispatch each
//! against the shared server state, write the reply, until the client
//! closes or goes idle past the read timeout.

use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use serde::Serialize;

use crate::finder::{ElementFinder, DEFAULT_FIND_TIMEOUT_MS};
use crate::server::ServerShared;
use crate::timing;

/// Longest wait a wire argument can request.
const MAX_WIRE_WAIT_MS: u64 = 60_000;

pub(crate) fn handle_connection(
    mut stream: TcpStream,
    shared: Arc<ServerShared>,
    shutdown: Arc<AtomicBool>,
) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    if let Err(e) = session(&mut stream, &shared, &shutdown) {
        debug!("session with {} ended: {}", peer, e);
    }
}

fn session(
    stream: &mut TcpStream,
    shared: &ServerShared,
    shutdown: &Arc<AtomicBool>,
) -> io::Result<()> {
    // Accepted sockets can inherit nonblocking mode from the listener.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(shared.config.session_read_timeout))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            debug!("session closed by server stop");
            break;
        }
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break, // client closed
            Ok(_) => {
                let args = parse_command_line(line.trim());
                if args.is_empty() {
                    continue;
                }
                let reply = dispatch(&args, shared, shutdown);
                stream.write_all(reply.as_bytes())?;
                stream.write_all(b"\n")?;
                stream.flush()?;
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                debug!("session idle past read timeout");
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Splits a command line into arguments. Double quotes group words and
/// backslash escapes the next character inside quotes.
fn parse_command_line(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

fn dispatch(args: &[String], shared: &ServerShared, shutdown: &Arc<AtomicBool>) -> String {
    let cmd = args[0].as_str();
    let args = &args[1..];
    match cmd {
        "ping" => "pong".to_string(),
        "list-windows" => list_windows(args, shared),
        "get-focus" => get_focus(shared),
        "find-element" => find_element(args, shared, shutdown),
        "find-element-by-id" => find_element_by_id(args, shared, shutdown),
        "last-toast" => last_toast(args, shared, shutdown),
        "audio-active" => audio_active(shared),
        "screen-times" => screen_times(args, shared),
        "server-info" => server_info(args, shared),
        _ => format!("ERROR: unknown command: {}", cmd),
    }
}

fn json_flag(args: &[String]) -> bool {
    args.iter().any(|a| a == "-J")
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("ERROR: json: {}", e))
}

fn parse_timeout(arg: Option<&String>) -> Duration {
    let ms = arg
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_FIND_TIMEOUT_MS);
    Duration::from_millis(ms.min(MAX_WIRE_WAIT_MS))
}

fn with_finder(
    shared: &ServerShared,
    shutdown: &Arc<AtomicBool>,
    run: impl FnOnce(ElementFinder) -> String,
) -> String {
    match shared.host() {
        Some(host) => run(ElementFinder::with_cancel(host, Arc::clone(shutdown))),
        None => "ERROR: no host context".to_string(),
    }
}

fn list_windows(args: &[String], shared: &ServerShared) -> String {
    let infos = shared.registry.window_infos();
    if json_flag(args) {
        to_json(&infos)
    } else {
        infos
            .iter()
            .map(|w| {
                let flag = if w.focused { "*" } else { "" };
                format!("{}: {}{}", w.id, w.title, flag)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn get_focus(shared: &ServerShared) -> String {
    match shared.registry.focused_window() {
        Some(w) => format!("{}: {}", w.id(), w.title()),
        None => "none".to_string(),
    }
}

fn find_element(args: &[String], shared: &ServerShared, shutdown: &Arc<AtomicBool>) -> String {
    let text = match args.first() {
        Some(text) => text.clone(),
        None => return "ERROR: usage: find-element <text> [index] [timeout-ms]".to_string(),
    };
    let index = args.get(1).and_then(|s| s.parse::<usize>().ok()).unwrap_or(0);
    let timeout = parse_timeout(args.get(2));
    with_finder(shared, shutdown, |finder| {
        match finder.find_by_text(&text, index, timeout) {
            Some(el) => format!("{} {}", el.center.x, el.center.y),
            None => "none".to_string(),
        }
    })
}

fn find_element_by_id(args: &[String], shared: &ServerShared, shutdown: &Arc<AtomicBool>) -> String {
    let id = match args.first() {
        Some(id) => id.clone(),
        None => return "ERROR: usage: find-element-by-id <id> [timeout-ms]".to_string(),
    };
    let timeout = parse_timeout(args.get(1));
    with_finder(shared, shutdown, |finder| {
        match finder.find_by_id(&id, timeout) {
            Some(el) => format!("{} {}", el.center.x, el.center.y),
            None => "none".to_string(),
        }
    })
}

fn last_toast(args: &[String], shared: &ServerShared, shutdown: &Arc<AtomicBool>) -> String {
    let timeout = parse_timeout(args.first());
    let exclude = args.get(1).cloned();
    with_finder(shared, shutdown, |finder| {
        match finder.last_toast(timeout, exclude.as_deref()) {
            Some(text) => text,
            None => "none".to_string(),
        }
    })
}

fn audio_active(shared: &ServerShared) -> String {
    match shared.host() {
        Some(host) => host.audio_active().to_string(),
        None => "ERROR: no host context".to_string(),
    }
}

fn screen_times(args: &[String], shared: &ServerShared) -> String {
    let rows = shared.timings.rows();
    if json_flag(args) {
        to_json(&rows)
    } else {
        timing::render_report(&rows).trim_end().to_string()
    }
}

#[derive(Serialize)]
struct ServerInfo<'a> {
    name: &'a str,
    version: &'a str,
    port: u16,
    started_at: String,
    uptime_secs: i64,
}

fn server_info(args: &[String], shared: &ServerShared) -> String {
    let uptime_secs = chrono::Local::now()
        .signed_duration_since(shared.created_at)
        .num_seconds();
    if json_flag(args) {
        to_json(&ServerInfo {
            name: env!("CARGO_PKG_NAME"),
            version: crate::VERSION,
            port: shared.config.port,
            started_at: shared.created_at.to_rfc3339(),
            uptime_secs,
        })
    } else {
        format!(
            "{} {} port {} up {}s",
            env!("CARGO_PKG_NAME"),
            crate::VERSION,
            shared.config.port,
            uptime_secs
        )
    }
}
