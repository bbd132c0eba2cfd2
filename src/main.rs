use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use claude_monitor::app::Config;
use claude_monitor::notify::{
    self, HostLink, NotificationId, NotificationPayload, Priority, SenderAck,
};
use claude_monitor::relay::{
    self, badge, control, history, ControlRequest, ControlResponse, MemoryStore, Relay,
    RelayManager, SqliteStore, StatusSnapshot, Store,
};

/// Claude Monitor - relays local push notifications to the desktop
#[derive(Parser)]
#[command(name = "claude-monitor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay daemon (default)
    Run,
    /// Run the external notification host
    Host {
        /// Accept relay connections on this socket instead of using stdio
        #[arg(long)]
        listen: Option<PathBuf>,
        /// Socket senders push notifications into
        #[arg(long, env = "CLAUDE_MONITOR_SOCKET")]
        socket: Option<PathBuf>,
    },
    /// Send a notification through the host
    Send {
        title: String,
        message: String,
        /// success, error, warning or info
        #[arg(default_value = "info")]
        priority: String,
        /// Host sender socket
        #[arg(long, env = "CLAUDE_MONITOR_SOCKET")]
        socket: Option<PathBuf>,
    },
    /// Show connection state, badge and recent notifications
    Status,
    /// Show a test notification
    Test,
    /// Reset the unread count
    MarkRead,
    /// Delete all notifications
    Clear,
    /// Delete one notification by id
    Delete { id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().unwrap_or_default();
    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());

    match cli.command {
        Some(Commands::Host { listen, socket }) => {
            init_logging(&level, "host.log")?;
            run_host(listen, socket)
        }
        Some(Commands::Send {
            title,
            message,
            priority,
            socket,
        }) => {
            init_logging(&level, "cli.log")?;
            handle_send(title, message, &priority, socket)
        }
        Some(Commands::Status) => {
            init_logging(&level, "cli.log")?;
            handle_status(&config)
        }
        Some(Commands::Test) => run_command(
            &config,
            ControlRequest::TestNotification,
            "Test notification shown",
        ),
        Some(Commands::MarkRead) => {
            run_command(&config, ControlRequest::MarkAsRead, "Marked all as read")
        }
        Some(Commands::Clear) => {
            run_command(&config, ControlRequest::ClearHistory, "History cleared")
        }
        Some(Commands::Delete { id }) => {
            let id = NotificationId::parse(&id);
            run_command(&config, ControlRequest::DeleteNotification { id }, "Notification deleted")
        }
        Some(Commands::Run) | None => {
            init_logging(&level, "relay.log")?;
            run_relay(config)
        }
    }
}

fn init_logging(level: &str, file_name: &str) -> Result<()> {
    let log_dir = notify::data_dir();

    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(file_name))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(log_file).with_ansi(false))
        .init();

    info!("Claude Monitor starting ({})", file_name);
    Ok(())
}

fn open_store(config: &Config) -> Box<dyn Store> {
    match SqliteStore::open(&config.store_path) {
        Ok(store) => Box::new(store),
        Err(e) => {
            tracing::warn!(
                "Failed to open store at {}, history will not persist: {}",
                config.store_path.display(),
                e
            );
            Box::new(MemoryStore::default())
        }
    }
}

fn run_relay(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let control_socket = config.control_socket.clone();

    runtime.block_on(async move {
        let endpoint = config.channel.endpoint.clone();
        let manager = RelayManager::restore(
            open_store(&config),
            relay::default_surface(config.desktop_notifications),
            endpoint.label(),
            config.history_limit,
        );
        let (relay, handle) = Relay::new(endpoint, config.channel.reconnect_delay(), manager);

        let control_socket = config.control_socket.clone();
        let control = tokio::spawn(async move {
            if let Err(e) = control::run_control_server(&control_socket, handle).await {
                tracing::error!("Control socket error: {}", e);
            }
        });

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
                let _ = shutdown_tx.send(true);
            }
        });

        relay.run(shutdown_rx).await;
        control.abort();
    });

    // Clean up socket on exit
    let _ = std::fs::remove_file(&control_socket);
    Ok(())
}

fn run_host(listen: Option<PathBuf>, socket: Option<PathBuf>) -> Result<()> {
    let sender_socket = socket.unwrap_or_else(notify::sender_socket_path);
    let link = match listen {
        Some(path) => HostLink::Listen(path),
        None => HostLink::Stdio,
    };
    let channel_socket = match &link {
        HostLink::Listen(path) => Some(path.clone()),
        HostLink::Stdio => None,
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async {
        tokio::select! {
            result = notify::run_host(link, &sender_socket) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                Ok(())
            }
        }
    });

    let _ = std::fs::remove_file(&sender_socket);
    if let Some(path) = channel_socket {
        let _ = std::fs::remove_file(path);
    }
    result
}

fn handle_send(
    title: String,
    message: String,
    priority: &str,
    socket: Option<PathBuf>,
) -> Result<()> {
    let socket_path = socket.unwrap_or_else(notify::sender_socket_path);
    let payload = NotificationPayload::new(title.clone(), message, Priority::from_str(priority));

    match notify::send_notification(&socket_path, &payload) {
        Ok(SenderAck::Ok { id }) => {
            info!("Notification {} sent", id);
            println!("Notification sent: {}", title);
            Ok(())
        }
        Ok(SenderAck::Error { message }) => {
            anyhow::bail!("Host rejected notification: {}", message)
        }
        Err(e) => {
            if !socket_path.exists() {
                eprintln!("Host is not running (no socket at {})", socket_path.display());
            }
            Err(e)
        }
    }
}

fn query_status(config: &Config) -> Result<StatusSnapshot> {
    match control::request(&config.control_socket, &ControlRequest::GetStatus)
        .context("Relay is not running")?
    {
        ControlResponse::Status(status) => Ok(status),
        ControlResponse::Outcome(outcome) => {
            anyhow::bail!(outcome.error.unwrap_or_else(|| "Unexpected response".to_string()))
        }
    }
}

fn handle_status(config: &Config) -> Result<()> {
    let status = query_status(config)?;
    let connection = if status.connected {
        notify::ConnectionState::Connected
    } else {
        notify::ConnectionState::Disconnected
    };
    let badge = badge::present(connection, status.unread_count);

    println!(
        "{} ({})",
        if status.connected { "Connected" } else { "Server Offline" },
        status.server_label
    );
    println!("Badge: {:?}", badge.text);
    println!(
        "Total: {}  Today: {}  Unread: {}",
        status.history.len(),
        history::count_on_day(status.history.iter(), Local::now()),
        status.unread_count
    );

    if status.history.is_empty() {
        println!("\nNo notifications yet");
        println!("Send one with: claude-monitor send \"Title\" \"Message\"");
        return Ok(());
    }

    println!();
    for n in status.history.iter().take(20) {
        println!(
            "[{}] {:<7} {}  {}: {}",
            n.id,
            n.priority.as_str(),
            n.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            n.title,
            n.message
        );
    }
    Ok(())
}

fn run_command(config: &Config, request: ControlRequest, done: &str) -> Result<()> {
    let response =
        control::request(&config.control_socket, &request).context("Relay is not running")?;
    match response {
        ControlResponse::Outcome(outcome) if outcome.success => {
            println!("{}", done);
            Ok(())
        }
        ControlResponse::Outcome(outcome) => {
            anyhow::bail!(outcome.error.unwrap_or_else(|| "Command failed".to_string()))
        }
        ControlResponse::Status(_) => anyhow::bail!("Unexpected response"),
    }
}
