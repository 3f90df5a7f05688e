// demos/probe_demo.rs
//
// End-to-end tour of the uiprobe surface: embeds the server in this
// process, fakes a host application (elements, toast, audio, window
// callbacks, screen timings), then drives every protocol command through
// ControlClient and prints each exchange.
//
// Usage:
//   cargo run --example probe_demo
//   UIPROBE_PORT=5001 cargo run --example probe_demo

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use uiprobe::{
    AutomationServer, ControlClient, HostContext, LifecyclePhase, ServerConfig, UiElement,
    WindowHandle,
};

struct DemoHost {
    elements: Mutex<Vec<UiElement>>,
    audio: AtomicBool,
}

impl HostContext for DemoHost {
    fn initialize(&self) {
        println!("    host initialize() ran (one-shot)");
    }

    fn elements(&self) -> Vec<UiElement> {
        self.elements.lock().clone()
    }

    fn audio_active(&self) -> bool {
        self.audio.load(Ordering::SeqCst)
    }
}

fn main() {
    let config = ServerConfig::from_env();
    let port = config.port;
    println!("=== uiprobe demo (port {}) ===", port);
    println!();

    // ── 1. Construct and install ──
    println!("[1] Installing the server...");
    let server = AutomationServer::with_config(config).expect("another server is live");
    println!(
        "    effective config: port {}, {} workers",
        server.config().port,
        server.config().workers
    );
    let host = Arc::new(DemoHost {
        elements: Mutex::new(vec![
            UiElement::new("title", "Settings", 100, 20),
            UiElement::new("button_ok", "OK", 40, 300),
            UiElement::new("row_wifi", "Wi-Fi settings", 160, 120),
        ]),
        audio: AtomicBool::new(false),
    });
    server.install(host.clone());

    let client = ControlClient::new(port);
    let deadline = Instant::now() + Duration::from_secs(3);
    while !client.ping() {
        if Instant::now() >= deadline {
            println!("    server never became reachable (port {} in use?)", port);
            println!("    is_running() = {}", server.is_running());
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    println!("    reachable, is_running() = {}", server.is_running());
    println!();

    // ── 2. Host callbacks feed the registry ──
    println!("[2] Simulating window lifecycle callbacks...");
    let login = WindowHandle::new("LoginScreen");
    let home = WindowHandle::new("HomeScreen");
    server.add_window(&login);
    server.add_window(&home);
    server.set_focused_window(&home);
    server
        .timings()
        .record_phase("LoginScreen", LifecyclePhase::Create, Duration::from_millis(120));
    server
        .timings()
        .record_phase("HomeScreen", LifecyclePhase::Create, Duration::from_millis(640));
    server
        .timings()
        .record_phase("HomeScreen", LifecyclePhase::Resume, Duration::from_millis(210));
    println!("    2 windows added, HomeScreen focused, timings recorded");
    println!();

    // ── 3. Drive the protocol ──
    println!("[3] Protocol round trips:");
    let commands = [
        "ping",
        "list-windows",
        "list-windows -J",
        "get-focus",
        "find-element \"Wi-Fi settings\"",
        "find-element settings 1 500",
        "find-element-by-id button_ok",
        "audio-active",
        "screen-times",
        "server-info -J",
        "bogus-command",
    ];
    for cmd in commands {
        match client.send(cmd) {
            Ok(reply) => println!("    > {}\n      {}", cmd, reply.replace('\n', "\n      ")),
            Err(e) => println!("    > {}\n      transport error: {}", cmd, e),
        }
    }
    println!();

    // ── 4. Toast appearing while a client waits ──
    println!("[4] last-toast with a toast raised mid-wait:");
    let writer = host.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        writer
            .elements
            .lock()
            .push(UiElement::new("message", "profile saved", 10, 400));
    });
    let patient = ControlClient::with_read_timeout(port, Duration::from_secs(3));
    println!("    > last-toast 2000");
    println!("      {}", patient.send("last-toast 2000").unwrap());
    println!();

    // ── 5. Teardown ──
    println!("[5] Stopping...");
    let stopped = server.stop();
    println!(
        "    stop() = {}, is_running() = {}, registry windows = {}",
        stopped,
        server.is_running(),
        server.snapshot().len()
    );
    println!("Done.");
}
