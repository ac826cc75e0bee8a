//! Email collaborator
//!
//! Fire-and-forget SMTP delivery for verification codes, password resets
//! and order confirmations. Without SMTP configuration the mailer degrades
//! to logging, so local setups work without a relay.

use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::Config;

#[derive(Clone)]
pub struct Mailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Option<Mailbox>,
}

impl Mailer {
    pub fn from_config(config: &Config) -> Self {
        let Some(smtp) = &config.smtp else {
            tracing::info!("SMTP not configured, outgoing mail will only be logged");
            return Self { transport: None, from: None };
        };

        let from = match smtp.from.parse::<Mailbox>() {
            Ok(mailbox) => mailbox,
            Err(err) => {
                tracing::error!("invalid SMTP_FROM address, mail disabled: {err}");
                return Self { transport: None, from: None };
            }
        };

        match AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host) {
            Ok(builder) => {
                let transport = builder
                    .credentials(Credentials::new(smtp.username.clone(), smtp.password.clone()))
                    .build();
                Self { transport: Some(transport), from: Some(from) }
            }
            Err(err) => {
                tracing::error!("SMTP relay setup failed, mail disabled: {err}");
                Self { transport: None, from: None }
            }
        }
    }

    /// Queue a message without blocking the request. Delivery failures are
    /// logged, never surfaced.
    pub fn send(&self, to: &str, subject: &str, text: String, html: String) {
        let (Some(transport), Some(from)) = (self.transport.clone(), self.from.clone()) else {
            tracing::info!("mail skipped (no SMTP): to={to} subject={subject}");
            return;
        };

        let Ok(recipient) = to.parse::<Mailbox>() else {
            tracing::warn!("mail skipped, invalid recipient: {to}");
            return;
        };

        let message = Message::builder()
            .from(from)
            .to(recipient)
            .subject(subject)
            .multipart(MultiPart::alternative_plain_html(text, html));

        let message = match message {
            Ok(message) => message,
            Err(err) => {
                tracing::error!("failed to build mail: {err}");
                return;
            }
        };

        let to = to.to_string();
        let subject = subject.to_string();
        tokio::spawn(async move {
            match transport.send(message).await {
                Ok(_) => tracing::info!("mail sent: to={to} subject={subject}"),
                Err(err) => tracing::warn!("mail delivery failed: to={to} err={err}"),
            }
        });
    }
}
