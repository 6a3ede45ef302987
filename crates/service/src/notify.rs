//! Best-effort user notifications: in-app documents plus optional email.
//!
//! Nothing in here ever fails the operation that triggered it. Storage errors
//! are logged; email is sent from a detached task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use model::{Identity, Notification, NotificationKind, NotificationPage, Priority};
use repository::NotificationsRepository;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::ServiceError;

/// Default and maximum page sizes of the notification list.
pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail relay request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Mail relay rejected the message with status {0}")]
    Rejected(u16),
}

/// A plain-text email.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

/// Email delivery capability.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// Delivers email by POSTing it as JSON to an HTTP mail relay.
pub struct HttpMailer {
    client: Client,
    endpoint: String,
}

impl HttpMailer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, MailError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint: endpoint.into() })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let response = self.client.post(&self.endpoint).json(email).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MailError::Rejected(status.as_u16()));
        }
        debug!(to = %email.to, "Email handed to relay");
        Ok(())
    }
}

/// Mailer used when no relay is configured: only logs what would be sent.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        info!(to = %email.to, subject = %email.subject, "Email (not delivered, no relay configured)");
        Ok(())
    }
}

/// What to tell a user.
#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: NotificationKind,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    pub related_id: Option<String>,
}

impl Notice {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            priority: Priority::Medium,
            title: title.into(),
            message: message.into(),
            related_id: None,
        }
    }

    pub fn related_to(mut self, id: impl Into<String>) -> Self {
        self.related_id = Some(id.into());
        self
    }
}

/// Fire-and-forget notification side channel.
pub struct Notifier {
    repo: Arc<dyn NotificationsRepository>,
    mailer: Arc<dyn Mailer>,
    from: String,
}

impl Notifier {
    pub fn new(repo: Arc<dyn NotificationsRepository>, mailer: Arc<dyn Mailer>, from: impl Into<String>) -> Self {
        Self { repo, mailer, from: from.into() }
    }

    /// Stores an in-app notification for `user_id` and, when `email` is known,
    /// mails it in the background.
    pub async fn notify(&self, user_id: &str, email: Option<&str>, notice: Notice) {
        let notification = Notification {
            id: model::new_id(),
            user_id: user_id.to_string(),
            title: notice.title.clone(),
            message: notice.message.clone(),
            kind: notice.kind,
            priority: notice.priority,
            read: false,
            related_id: notice.related_id,
            created_at: Utc::now(),
        };
        if let Err(e) = self.repo.insert(&notification).await {
            warn!(user_id, "Failed to store notification: {}", e);
        }

        if let Some(to) = email {
            let mailer = self.mailer.clone();
            let email = Email {
                from: self.from.clone(),
                to: to.to_string(),
                subject: notice.title,
                text: notice.message,
            };
            tokio::spawn(async move {
                if let Err(e) = mailer.send(&email).await {
                    warn!(to = %email.to, "Failed to send email: {}", e);
                }
            });
        }
    }
}

/// The caller's notification inbox.
pub struct NotificationService {
    repo: Arc<dyn NotificationsRepository>,
}

impl NotificationService {
    pub fn new(repo: Arc<dyn NotificationsRepository>) -> Self {
        Self { repo }
    }

    async fn owned(&self, identity: &Identity, id: &str) -> Result<Notification, ServiceError> {
        let notification = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Notification"))?;
        if !identity.owns(&notification.user_id) {
            return Err(ServiceError::Unauthorized);
        }
        Ok(notification)
    }

    /// One page of the caller's notifications, newest first.
    ///
    /// `page` starts at 1 and `limit` must be within `1..=100`; both default
    /// when absent.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn list(
        &self,
        identity: &Identity,
        page: Option<u64>,
        limit: Option<u64>,
    ) -> Result<NotificationPage, ServiceError> {
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if page < 1 {
            return Err(ServiceError::Validation("page must be at least 1".into()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(ServiceError::Validation(format!("limit must be between 1 and {MAX_PAGE_SIZE}")));
        }

        let user_id = &identity.user_id;
        let offset = (page - 1).saturating_mul(limit);
        let notifications = self.repo.list_by_user(user_id, offset, limit).await?;
        let total = self.repo.count_by_user(user_id).await?;
        let unread_count = self.repo.unread_count(user_id).await?;
        Ok(NotificationPage {
            notifications,
            page,
            limit,
            total,
            pages: total.div_ceil(limit),
            unread_count,
        })
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn mark_read(&self, identity: &Identity, id: &str) -> Result<Notification, ServiceError> {
        let mut notification = self.owned(identity, id).await?;
        if !notification.read {
            notification.read = true;
            self.repo.update(&notification).await?;
        }
        Ok(notification)
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn mark_all_read(&self, identity: &Identity) -> Result<u64, ServiceError> {
        Ok(self.repo.mark_all_read(&identity.user_id).await?)
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn delete(&self, identity: &Identity, id: &str) -> Result<(), ServiceError> {
        self.owned(identity, id).await?;
        self.repo.delete(id).await?;
        Ok(())
    }

    /// Deletes the caller's read notifications. Returns how many were removed.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn clear_read(&self, identity: &Identity) -> Result<u64, ServiceError> {
        Ok(self.repo.delete_read(&identity.user_id).await?)
    }
}
