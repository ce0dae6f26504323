use crate::alerts::sinks::{format_body, ChannelSink, SinkFuture};
use crate::config::EmailConfig;
use crate::error::SinkError;
use crate::findings::Finding;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::debug;
use std::time::Duration;

/// Delivers findings as plain-text email over SMTP with STARTTLS
pub struct EmailSink {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

fn parse_mailbox(address: &str, role: &str) -> Result<Mailbox, SinkError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| SinkError::Rejected(format!("invalid {} address '{}': {}", role, address, e)))
}

impl EmailSink {
    /// Create an email sink
    ///
    /// No connection is made until the first delivery.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Rejected` for malformed addresses and
    /// `SinkError::Unreachable` if the relay's TLS parameters cannot be built.
    pub fn new(config: EmailConfig, timeout: Duration) -> Result<Self, SinkError> {
        let from = parse_mailbox(config.sender(), "sender")?;
        let to = parse_mailbox(&config.to, "recipient")?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)?
            .port(config.smtp_port)
            .credentials(Credentials::new(config.username, config.password))
            .timeout(Some(timeout))
            .build();

        Ok(Self {
            transport,
            from,
            to,
        })
    }

    pub fn subject(finding: &Finding) -> String {
        format!("[{}] Irrigation System Alert", finding.priority.label())
    }

    fn body(finding: &Finding) -> String {
        format!(
            "Priority: {}\n\n{}\n\n---\nIrrigation monitoring",
            finding.priority.label(),
            format_body(finding)
        )
    }

    /// Build the message for a finding
    pub fn message(&self, finding: &Finding) -> Result<Message, SinkError> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(Self::subject(finding))
            .header(ContentType::TEXT_PLAIN)
            .body(Self::body(finding))
            .map_err(|e| SinkError::Rejected(e.to_string()))
    }
}

impl ChannelSink for EmailSink {
    fn name(&self) -> &str {
        "email"
    }

    fn send<'a>(&'a self, finding: &'a Finding) -> SinkFuture<'a> {
        Box::pin(async move {
            let message = self.message(finding)?;
            self.transport.send(message).await?;
            debug!("Email notification sent to {}", self.to);
            Ok(())
        })
    }
}
