//! Send notifications (emails) to NGOs and volunteers.
//!
//! Rendering and delivery belong to the mail worker consuming the queue;
//! this module only publishes events and reports whether publishing worked.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lapin::options::{
    BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::{
    AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo,
};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use crate::config::Mail;

const DEFAULT_AMPQ_HOST: &str = "localhost";
const DEFAULT_AMPQ_PORT: u16 = 5672;
const DEFAULT_AMPQ_VHOST: &str = "/";

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const ID_LENGTH: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("no notification gateway configured")]
    Disabled,
    #[error("invalid gateway address: {0}")]
    Address(#[from] url::ParseError),
    #[error("unknown AMQP scheme")]
    InvalidScheme,
    #[error(transparent)]
    Amqp(#[from] lapin::Error),
    #[error("publish was not acknowledged by the broker")]
    NotAcknowledged,
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("gateway timed out")]
    Timeout,
}

/// Mail templates list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// Acknowledge a new NGO registration.
    RegistrationReceived,
    /// Deliver the temporary password of an approved NGO.
    Approved,
    /// Explain why a registration was rejected.
    Rejected,
    /// Alert an NGO that its status changed after a decision.
    StatusChanged,
    /// Deliver credentials of a new volunteer.
    VolunteerCredentials,
}

impl Template {
    pub fn as_str(&self) -> &'static str {
        match self {
            Template::RegistrationReceived => "registration_received",
            Template::Approved => "approved",
            Template::Rejected => "rejected",
            Template::StatusChanged => "status_changed",
            Template::VolunteerCredentials => "volunteer_credentials",
        }
    }
}

/// Message handed to the gateway.
#[derive(Clone, Serialize)]
pub struct Notification {
    pub template: Template,
    pub to: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Notification {
    /// Create a new [`Notification`].
    pub fn new(template: Template, to: impl Into<String>) -> Self {
        Self {
            template,
            to: to.into(),
            data: Map::new(),
        }
    }

    /// Add template data.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_owned(), value.into());
        self
    }
}

// Template data may hold credentials.
impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("template", &self.template)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

/// Port for sending notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), MailError>;
}

#[derive(Debug, Serialize)]
struct Cloudevent<'a> {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: &'a Notification,
}

/// RabbitMQ publisher.
#[derive(Debug, Clone, Default)]
pub struct MailManager {
    queue: String,
    conn: Option<Arc<Connection>>,
}

impl MailManager {
    /// Create a new [`MailManager`].
    pub async fn new(config: &Mail) -> Result<Self, MailError> {
        let addr = Url::parse(&config.address)?;
        let uri = AMQPUri {
            scheme: AMQPScheme::from_str(addr.scheme())
                .map_err(|_| MailError::InvalidScheme)?,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
                host: addr.host_str().unwrap_or(DEFAULT_AMPQ_HOST).into(),
                port: addr.port().unwrap_or(DEFAULT_AMPQ_PORT),
            },
            vhost: config
                .vhost
                .clone()
                .unwrap_or(DEFAULT_AMPQ_VHOST.to_string()),
            query: AMQPQueryString {
                channel_max: config.pool,
                ..Default::default()
            },
        };

        let conn_config = ConnectionProperties::default()
            .with_connection_name("pashurakshak_mail_client".into());
        let conn = Connection::connect_uri(uri, conn_config).await?;

        tracing::info!(%addr, queue = config.queue, "rabbitmq connected");

        Ok(Self {
            queue: config.queue.clone(),
            conn: Some(Arc::new(conn)),
        })
    }

    async fn create_channel(
        conn: Arc<Connection>,
        queue: &str,
    ) -> Result<Channel, MailError> {
        let channel = conn.create_channel().await?;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        Ok(channel)
    }

    fn create_event(data: &Notification) -> Cloudevent<'_> {
        let id = Alphanumeric.sample_string(&mut OsRng, ID_LENGTH);
        Cloudevent {
            specversion: CLOUDEVENT_VERSION,
            r#type: "org.pashurakshak.email",
            source: "org.pashurakshak.api",
            id,
            time: Utc::now().to_rfc3339(),
            datacontenttype: DATA_CONTENT_TYPE,
            data,
        }
    }
}

#[async_trait]
impl Notifier for MailManager {
    async fn send(&self, notification: &Notification) -> Result<(), MailError> {
        let Some(conn) = &self.conn else {
            return Err(MailError::Disabled);
        };
        let channel =
            Self::create_channel(Arc::clone(conn), &self.queue).await?;

        let payload = serde_json::to_vec(&Self::create_event(notification))?;

        let confirmation = channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into())
                    .with_delivery_mode(2),
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(MailError::NotAcknowledged);
        }

        tracing::trace!(template = ?notification.template, "event sent");
        Ok(())
    }
}

/// Timeout-bounded access to a [`Notifier`].
#[derive(Clone)]
pub struct NotificationGateway {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl NotificationGateway {
    /// Create a new [`NotificationGateway`].
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self { notifier, timeout }
    }

    /// Send and wait for the outcome. Never exceeds the gateway timeout.
    pub async fn deliver(&self, notification: &Notification) -> bool {
        let result =
            tokio::time::timeout(self.timeout, self.notifier.send(notification))
                .await
                .unwrap_or(Err(MailError::Timeout));

        let outcome = if result.is_ok() { "sent" } else { "failed" };
        metrics::counter!(
            "notifications_total",
            "template" => notification.template.as_str(),
            "outcome" => outcome
        )
        .increment(1);

        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    template = ?notification.template,
                    error = %err,
                    "notification not delivered"
                );
                false
            },
        }
    }

    /// Best-effort send, the caller does not wait for the outcome.
    pub fn dispatch(&self, notification: Notification) {
        let gateway = self.clone();
        tokio::spawn(async move {
            gateway.deliver(&notification).await;
        });
    }
}
