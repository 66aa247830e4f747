use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    CreationFailed { target_user_id: String },
    PersistenceFailed { conversation_id: String },
    Archived { count: usize },
    Deleted { count: usize },
    Restored { count: usize },
}

/// Non-blocking, user-visible message (a toast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub kind: NoticeKind,
    pub text: String,
}

/// Sending half handed to services. A dropped receiver is not an error:
/// there is simply nobody left to show the toast to.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notice>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn info(&self, kind: NoticeKind, text: impl Into<String>) {
        self.send(NoticeLevel::Info, kind, text.into());
    }

    pub fn error(&self, kind: NoticeKind, text: impl Into<String>) {
        self.send(NoticeLevel::Error, kind, text.into());
    }

    fn send(&self, level: NoticeLevel, kind: NoticeKind, text: String) {
        if self.tx.send(Notice { level, kind, text }).is_err() {
            tracing::debug!("Notice dropped, no receiver");
        }
    }
}
