use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kernel_chat::cli::repl::{ReplCommand, ReplSession, parse_line, render_message, write_export};
use kernel_chat::cli::{self, RuntimeOptions};
use kernel_chat::context::AppContext;
use kernel_chat::instance::{ChatInstance, InstanceEvent};
use kernel_chat::registry::RegistryEvent;
use kernel_chat::stdio_kernel::StdioKernel;
use kernel_chat::transport::{Transport, TransportEvent};
use kernel_chat_config::ClientConfig;
use kernel_chat_protocol::MessageDisplay;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Notify, mpsc};

/// How long `--list-instances` waits for the backend's instance set.
const LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// Output produced by observers, printed by the main loop.
enum UiEvent {
    Print(String),
    Export(Value),
}

#[tokio::main]
async fn main() -> Result<()> {
    let options = cli::process_cli();
    let config = load_config(&options)?;

    // Unified logging goes to the temp-dir log file; stdout is the chat.
    let level = kernel_chat::debug::init_log_bridge(options.log_level, config.log_level);
    log::info!(
        "Starting kernel-chat {} (log level {level}, log file {})",
        kernel_chat::VERSION,
        kernel_chat::debug::log_path().display()
    );

    let context = Arc::new(AppContext::new(options.wizard || config.wizard_mode));
    let transport = Transport::new(config.clone(), context);

    let (events, mut ui) = mpsc::unbounded_channel();
    let synced = Arc::new(Notify::new());
    wire_observers(&transport, &events, &synced);

    let kernel = StdioKernel::spawn(&config.kernel, &config.kernel_env())
        .context("failed to start the kernel process")?;
    transport
        .connect(kernel.clone())
        .await
        .context("failed to connect to the kernel")?;

    if options.list_instances {
        if tokio::time::timeout(LIST_TIMEOUT, synced.notified())
            .await
            .is_err()
        {
            eprintln!("kernel-chat: the backend did not report its instances");
        }
        for instance in transport.registry().all() {
            println!("{}\t{}", instance.name(), instance.mode());
        }
        kernel.shutdown().await;
        return Ok(());
    }

    let current = options
        .instance
        .clone()
        .unwrap_or_else(|| config.default_instance.name.clone());
    let mut repl = ReplSession::new(Arc::clone(&transport), current);
    println!("kernel-chat: talking to '{}' (/quit to leave)", repl.current());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match parse_line(&line) {
                    Ok(Some(ReplCommand::Quit)) => break,
                    Ok(Some(command)) => match repl.apply(command) {
                        Ok(Some(feedback)) => println!("{feedback}"),
                        Ok(None) => {}
                        Err(e) => eprintln!("kernel-chat: {e}"),
                    },
                    Ok(None) => {}
                    Err(e) => eprintln!("kernel-chat: {e}"),
                }
            }
            Some(event) = ui.recv() => match event {
                UiEvent::Print(text) => println!("{text}"),
                UiEvent::Export(data) => match write_export(&config.effective_export_dir(), &data) {
                    Ok(path) => println!("exported instances to {}", path.display()),
                    Err(e) => eprintln!("kernel-chat: {e:#}"),
                },
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    log::info!("Shutting down");
    kernel.shutdown().await;
    Ok(())
}

fn load_config(options: &RuntimeOptions) -> Result<ClientConfig> {
    match &options.config_path {
        Some(path) => ClientConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => ClientConfig::load().context("failed to load config"),
    }
}

/// Print visible messages of every instance, now and as instances appear,
/// and forward exports to the main loop.
fn wire_observers(
    transport: &Arc<Transport>,
    events: &mpsc::UnboundedSender<UiEvent>,
    synced: &Arc<Notify>,
) {
    for instance in transport.registry().all() {
        watch_instance(&instance, events.clone());
    }

    let weak = Arc::downgrade(transport);
    let sender = events.clone();
    transport.registry().subscribe(move |event| {
        let RegistryEvent::MembershipChanged(report) = event;
        let Some(transport) = weak.upgrade() else {
            return;
        };
        for name in &report.added {
            if let Some(instance) = transport.registry().get(name) {
                watch_instance(&instance, sender.clone());
            }
        }
    });

    let sender = events.clone();
    let synced = Arc::clone(synced);
    transport.subscribe(move |event| match event {
        TransportEvent::InstancesExported(data) => {
            let _ = sender.send(UiEvent::Export(data.clone()));
        }
        TransportEvent::LoadersChanged => synced.notify_one(),
        TransportEvent::UnknownInstance(_) | TransportEvent::Restarted => {}
    });
}

fn watch_instance(instance: &ChatInstance, events: mpsc::UnboundedSender<UiEvent>) {
    let name = instance.name().to_string();
    instance.subscribe(move |event| {
        if let InstanceEvent::MessagePushed(message) = event
            && message.display != MessageDisplay::Hidden
        {
            let _ = events.send(UiEvent::Print(format!(
                "[{name}] {}: {}",
                message.kind.as_str(),
                render_message(message)
            )));
        }
    });
}
