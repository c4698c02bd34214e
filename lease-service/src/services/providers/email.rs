use super::EmailSender;
use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use service_core::error::AppError;
use std::sync::Mutex;

pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailSender {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| AppError::EmailError(format!("Failed to create SMTP relay: {}", e)))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self { transport })
    }
}

fn mailbox(address: &str) -> Result<Mailbox, AppError> {
    address
        .parse()
        .map_err(|e| AppError::EmailError(format!("Invalid address {:?}: {}", address, e)))
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_email(
        &self,
        from: &str,
        to: &[String],
        bcc: &[String],
        subject: &str,
        html: &str,
        text: &str,
    ) -> Result<(), AppError> {
        let mut builder = Message::builder().from(mailbox(from)?).subject(subject);
        for address in to {
            builder = builder.to(mailbox(address)?);
        }
        for address in bcc {
            builder = builder.bcc(mailbox(address)?);
        }

        let message = builder.multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(text.to_string()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(html.to_string()),
                ),
        )?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::EmailError(format!("Failed to send email: {}", e)))?;

        tracing::info!(recipients = to.len() + bcc.len(), subject = %subject, "Email sent successfully");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentEmail {
    pub from: String,
    pub to: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Mock email sender for testing
#[derive(Default)]
pub struct MockEmailSender {
    sent: Mutex<Vec<SentEmail>>,
    fail: Mutex<bool>,
}

impl MockEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        if let Ok(mut flag) = self.fail.lock() {
            *flag = fail;
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait]
impl EmailSender for MockEmailSender {
    async fn send_email(
        &self,
        from: &str,
        to: &[String],
        bcc: &[String],
        subject: &str,
        html: &str,
        text: &str,
    ) -> Result<(), AppError> {
        if self.fail.lock().map(|f| *f).unwrap_or(false) {
            return Err(AppError::EmailError("SMTP relay unavailable".to_string()));
        }

        tracing::info!(subject = %subject, "[MOCK] Email would be sent");
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| AppError::EmailError("mock mailbox lock poisoned".to_string()))?;
        sent.push(SentEmail {
            from: from.to_string(),
            to: to.to_vec(),
            bcc: bcc.to_vec(),
            subject: subject.to_string(),
            html: html.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}
