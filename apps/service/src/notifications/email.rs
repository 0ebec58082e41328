use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MessageBuilder};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use super::{ChannelError, EmailTransport};
use crate::config::EmailConfig;

struct Smtp {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

/// SMTP email channel. Without an SMTP host every send is `NotConfigured`.
pub struct SmtpEmailTransport {
    inner: Option<Smtp>,
}

fn sender_mailbox(config: &EmailConfig) -> Result<Mailbox, ChannelError> {
    let address = config
        .from_email
        .as_deref()
        .or(config.smtp_user.as_deref())
        .ok_or_else(|| ChannelError::InvalidInput("no sender address: set FROM_EMAIL or SMTP_USER".into()))?;

    let address: Address = address
        .parse()
        .map_err(|e| ChannelError::InvalidInput(format!("bad sender address {address:?}: {e}")))?;
    Ok(Mailbox::new(Some(config.from_name.clone()), address))
}

impl SmtpEmailTransport {
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn from_config(config: &EmailConfig) -> Result<Self, ChannelError> {
        let Some(host) = config.smtp_host.as_deref() else {
            info!("SMTP host not set, email notifications disabled");
            return Ok(Self::disabled());
        };

        // Implicit TLS when secure (usually port 465), STARTTLS otherwise (usually 587).
        let builder = if config.smtp_secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        };
        let mut builder = builder
            .map_err(|e| ChannelError::Transport(format!("cannot set up SMTP relay {host}: {e}")))?
            .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            inner: Some(Smtp {
                transport: builder.build(),
                from: sender_mailbox(config)?,
            }),
        })
    }
}

/// Build the HTML message addressed to every recipient at once.
fn build_message(from: &Mailbox, to: &[String], subject: &str, html: &str) -> Result<Message, ChannelError> {
    let mut builder: MessageBuilder = Message::builder().from(from.clone()).subject(subject);
    for recipient in to {
        let mailbox: Mailbox = recipient
            .parse()
            .map_err(|e| ChannelError::InvalidInput(format!("bad recipient {recipient:?}: {e}")))?;
        builder = builder.to(mailbox);
    }

    builder
        .header(ContentType::TEXT_HTML)
        .body(html.to_string())
        .map_err(|e| ChannelError::InvalidInput(e.to_string()))
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    fn is_configured(&self) -> bool {
        self.inner.is_some()
    }

    async fn send(&self, to: &[String], subject: &str, html: &str) -> Result<(), ChannelError> {
        let smtp = self.inner.as_ref().ok_or(ChannelError::NotConfigured)?;
        if to.is_empty() {
            return Ok(());
        }

        let message = build_message(&smtp.from, to, subject, html)?;
        smtp.transport
            .send(message)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        Ok(())
    }
}
