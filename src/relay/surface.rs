//! User-visible notification surface

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::PresentationError;
use crate::notify::{Notification, Priority};

const DEFAULT_TITLE: &str = "Claude Monitor";
const DEFAULT_BODY: &str = "Notification from Claude Code";

/// What to show for one notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceRequest {
    /// Stable display handle, `claude-<id>`
    pub handle: String,
    pub title: String,
    pub body: String,
    pub icon: &'static str,
    pub priority: Priority,
    /// 0 = low, 1 = raised, 2 = highest
    pub level: u8,
    /// Keep on screen until dismissed
    pub require_interaction: bool,
}

impl SurfaceRequest {
    pub fn for_notification(notification: &Notification) -> Self {
        let priority = notification.priority;
        Self {
            handle: format!("claude-{}", notification.id),
            title: non_empty_or(&notification.title, DEFAULT_TITLE),
            body: non_empty_or(&notification.message, DEFAULT_BODY),
            icon: icon_for(priority),
            priority,
            level: match priority {
                Priority::Error => 2,
                Priority::Warning => 1,
                _ => 0,
            },
            require_interaction: priority == Priority::Error,
        }
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Freedesktop icon name per priority
pub fn icon_for(priority: Priority) -> &'static str {
    match priority {
        Priority::Info => "dialog-information",
        Priority::Success => "emblem-default",
        Priority::Warning => "dialog-warning",
        Priority::Error => "dialog-error",
    }
}

/// Shows notifications to the user
pub trait NotificationSurface: Send {
    fn show(&self, request: &SurfaceRequest) -> Result<(), PresentationError>;
}

/// Writes notifications to the log only
#[derive(Debug, Default)]
pub struct LogSurface;

impl NotificationSurface for LogSurface {
    fn show(&self, request: &SurfaceRequest) -> Result<(), PresentationError> {
        info!(
            handle = %request.handle,
            priority = request.priority.as_str(),
            "{}: {}",
            request.title,
            request.body
        );
        Ok(())
    }
}

/// Native desktop notifications
#[cfg(feature = "desktop-notifications")]
#[derive(Debug, Default)]
pub struct DesktopSurface;

#[cfg(feature = "desktop-notifications")]
impl NotificationSurface for DesktopSurface {
    fn show(&self, request: &SurfaceRequest) -> Result<(), PresentationError> {
        use notify_rust::{Notification, Timeout};

        let mut notification = Notification::new();
        notification
            .appname(DEFAULT_TITLE)
            .summary(&request.title)
            .body(&request.body)
            .icon(request.icon);

        if request.require_interaction {
            notification.timeout(Timeout::Never);
        }

        #[cfg(all(unix, not(target_os = "macos")))]
        {
            use notify_rust::Urgency;
            notification.urgency(match request.level {
                2 => Urgency::Critical,
                1 => Urgency::Normal,
                _ => Urgency::Low,
            });
        }

        notification
            .show()
            .map(|_| ())
            .map_err(|e| PresentationError::Backend(e.to_string()))
    }
}

/// Hands requests to a worker thread that drives a slow backend
///
/// `show` only queues, so the dispatch loop never waits on the display.
/// Backend failures are logged by the worker.
pub struct QueuedSurface {
    tx: mpsc::UnboundedSender<SurfaceRequest>,
}

impl QueuedSurface {
    pub fn spawn(inner: Box<dyn NotificationSurface>) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<SurfaceRequest>();
        std::thread::Builder::new()
            .name("notification-surface".to_string())
            .spawn(move || {
                while let Some(request) = rx.blocking_recv() {
                    if let Err(e) = inner.show(&request) {
                        warn!(handle = %request.handle, "Failed to show notification: {}", e);
                    }
                }
                debug!("Notification surface worker stopped");
            })?;
        Ok(Self { tx })
    }
}

impl NotificationSurface for QueuedSurface {
    fn show(&self, request: &SurfaceRequest) -> Result<(), PresentationError> {
        self.tx
            .send(request.clone())
            .map_err(|_| PresentationError::Backend("surface worker stopped".to_string()))
    }
}

/// Pick the surface for this build and configuration
pub fn default_surface(desktop: bool) -> Box<dyn NotificationSurface> {
    #[cfg(feature = "desktop-notifications")]
    {
        if desktop {
            match QueuedSurface::spawn(Box::new(DesktopSurface)) {
                Ok(surface) => return Box::new(surface),
                Err(e) => warn!("Failed to start notification worker, logging only: {}", e),
            }
        }
    }

    if desktop {
        debug!("Desktop notifications disabled at build time, logging only");
    }
    Box::new(LogSurface)
}
