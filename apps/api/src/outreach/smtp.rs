//! SMTP channel: provider detection, message building and STARTTLS submission.

use std::path::Path;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{info, warn};

use crate::outreach::candidate::{email_domain, DraftedMessage};
use crate::outreach::delivery::{MessageSender, SendError};

/// Attachments above this size are left off rather than bouncing the message.
pub const MAX_ATTACHMENT_BYTES: u64 = 25 * 1024 * 1024;

const SUBMISSION_PORT: u16 = 587;

#[derive(Debug, Error)]
pub enum SmtpConfigError {
    #[error("'{0}' is not a valid sender address")]
    InvalidSender(String),

    #[error("Unsupported email provider '{0}'. Use Gmail, Outlook, Yahoo, iCloud, AOL or Zoho, or set SMTP_HOST")]
    UnsupportedProvider(String),

    #[error("SMTP transport could not be built: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpServer {
    pub host: String,
    pub port: u16,
}

/// Picks the submission server for `sender`. `host_override` wins when set.
pub fn detect_server(
    sender: &str,
    host_override: Option<&str>,
    port_override: Option<u16>,
) -> Result<SmtpServer, SmtpConfigError> {
    let port = port_override.unwrap_or(SUBMISSION_PORT);
    if let Some(host) = host_override {
        return Ok(SmtpServer {
            host: host.to_string(),
            port,
        });
    }

    let domain =
        email_domain(sender).ok_or_else(|| SmtpConfigError::InvalidSender(sender.to_string()))?;

    let host = match domain.as_str() {
        "gmail.com" | "googlemail.com" => "smtp.gmail.com",
        "outlook.com" | "hotmail.com" | "live.com" | "office365.com" | "gatech.edu" => {
            "smtp.office365.com"
        }
        "yahoo.com" | "yahoo.co.uk" => "smtp.mail.yahoo.com",
        "icloud.com" | "me.com" | "mac.com" => "smtp.mail.me.com",
        "aol.com" => "smtp.aol.com",
        "zoho.com" => "smtp.zoho.com",
        _ => return Err(SmtpConfigError::UnsupportedProvider(domain)),
    };

    Ok(SmtpServer {
        host: host.to_string(),
        port,
    })
}

/// Everything needed to open an SMTP sender for one run.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub sender_email: String,
    pub sender_password: String,
    pub subject: String,
    pub host_override: Option<String>,
    pub port_override: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct ResumeAttachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl ResumeAttachment {
    /// Reads the résumé for attaching. Returns `None` (with a warning) when the
    /// file is missing or larger than `MAX_ATTACHMENT_BYTES`.
    pub async fn load(path: &Path) -> Option<Self> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) => {
                warn!("Résumé {} unavailable, sending without attachment: {e}", path.display());
                return None;
            }
        };
        if metadata.len() > MAX_ATTACHMENT_BYTES {
            warn!(
                "Résumé {} is {} bytes, over the {} byte limit; sending without attachment",
                path.display(),
                metadata.len(),
                MAX_ATTACHMENT_BYTES
            );
            return None;
        }

        match tokio::fs::read(path).await {
            Ok(bytes) => Some(Self {
                filename: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "resume.pdf".to_string()),
                bytes,
            }),
            Err(e) => {
                warn!("Failed to read résumé {}: {e}", path.display());
                None
            }
        }
    }
}

/// Sends drafted emails through one authenticated STARTTLS connection pool.
pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    subject: String,
    attachment: Option<ResumeAttachment>,
}

impl SmtpSender {
    pub fn new(
        settings: &SmtpSettings,
        attachment: Option<ResumeAttachment>,
    ) -> Result<Self, SmtpConfigError> {
        let server = detect_server(
            &settings.sender_email,
            settings.host_override.as_deref(),
            settings.port_override,
        )?;
        let from: Mailbox = settings
            .sender_email
            .parse()
            .map_err(|_| SmtpConfigError::InvalidSender(settings.sender_email.clone()))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&server.host)
            .map_err(|e| SmtpConfigError::Transport(e.to_string()))?
            .port(server.port)
            .credentials(Credentials::new(
                settings.sender_email.clone(),
                settings.sender_password.clone(),
            ))
            .build();

        info!(
            "SMTP sender ready for {} via {}:{}",
            settings.sender_email, server.host, server.port
        );

        Ok(Self {
            transport,
            from,
            subject: settings.subject.clone(),
            attachment,
        })
    }
}

/// Builds the MIME message: plain-text body plus the optional PDF attachment.
pub fn build_message(
    from: &Mailbox,
    subject: &str,
    draft: &DraftedMessage,
    attachment: Option<&ResumeAttachment>,
) -> Result<Message, SendError> {
    let org = &draft.candidate.organization_name;
    let address = draft
        .candidate
        .contact_address
        .as_deref()
        .ok_or_else(|| SendError::NoAddress(org.clone()))?;
    let to: Mailbox = address
        .parse()
        .map_err(|_| SendError::Build(format!("'{address}' is not a valid recipient")))?;

    let builder = Message::builder()
        .from(from.clone())
        .to(to)
        .subject(subject);

    let result = match attachment {
        Some(file) => {
            let pdf = ContentType::parse("application/pdf")
                .map_err(|e| SendError::Build(e.to_string()))?;
            builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(draft.body_text.clone()))
                    .singlepart(Attachment::new(file.filename.clone()).body(file.bytes.clone(), pdf)),
            )
        }
        None => builder.body(draft.body_text.clone()),
    };

    result.map_err(|e| SendError::Build(e.to_string()))
}

#[async_trait]
impl MessageSender for SmtpSender {
    async fn send(&self, draft: &DraftedMessage) -> Result<(), SendError> {
        let message = build_message(&self.from, &self.subject, draft, self.attachment.as_ref())?;

        self.transport.send(message).await.map_err(|e| {
            if e.is_permanent() {
                SendError::Rejected(e.to_string())
            } else {
                SendError::Transport(e.to_string())
            }
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::outreach::candidate::email_candidate;

    #[test]
    fn test_detects_known_providers() {
        let cases = [
            ("me@gmail.com", "smtp.gmail.com"),
            ("me@GoogleMail.com", "smtp.gmail.com"),
            ("me@hotmail.com", "smtp.office365.com"),
            ("gp12@gatech.edu", "smtp.office365.com"),
            ("me@yahoo.co.uk", "smtp.mail.yahoo.com"),
            ("me@mac.com", "smtp.mail.me.com"),
            ("me@aol.com", "smtp.aol.com"),
            ("me@zoho.com", "smtp.zoho.com"),
        ];
        for (sender, host) in cases {
            let server = detect_server(sender, None, None).unwrap();
            assert_eq!(server.host, host, "{sender}");
            assert_eq!(server.port, 587);
        }
    }

    #[test]
    fn test_unsupported_domain_is_an_error() {
        let err = detect_server("me@example.org", None, None).unwrap_err();
        assert!(matches!(err, SmtpConfigError::UnsupportedProvider(d) if d == "example.org"));
        assert!(matches!(
            detect_server("not-an-address", None, None),
            Err(SmtpConfigError::InvalidSender(_))
        ));
    }

    #[test]
    fn test_override_skips_detection() {
        let server = detect_server("me@example.org", Some("mail.example.org"), Some(2525)).unwrap();
        assert_eq!(
            server,
            SmtpServer {
                host: "mail.example.org".to_string(),
                port: 2525
            }
        );
    }

    fn draft() -> DraftedMessage {
        DraftedMessage {
            candidate: email_candidate("Acme", Some("Jane"), "jane@acme.com"),
            body_text: "Hi Jane,\n\nI'd love to help with your solar work.".to_string(),
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_build_message_attaches_resume() {
        let from: Mailbox = "sam@gmail.com".parse().unwrap();
        let attachment = ResumeAttachment {
            filename: "sam_resume.pdf".to_string(),
            bytes: b"%PDF-1.4 fake".to_vec(),
        };

        let message = build_message(&from, "Internship inquiry", &draft(), Some(&attachment)).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("To: jane@acme.com"));
        assert!(raw.contains("Subject: Internship inquiry"));
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("sam_resume.pdf"));
        assert!(raw.contains("application/pdf"));
    }

    #[test]
    fn test_build_message_without_address_fails() {
        let from: Mailbox = "sam@gmail.com".parse().unwrap();
        let mut d = draft();
        d.candidate.contact_address = None;
        assert!(matches!(
            build_message(&from, "Hi", &d, None),
            Err(SendError::NoAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_resume_is_left_off() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ResumeAttachment::load(&dir.path().join("missing.pdf")).await.is_none());

        let path = dir.path().join("resume.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        let loaded = ResumeAttachment::load(&path).await.unwrap();
        assert_eq!(loaded.filename, "resume.pdf");
        assert_eq!(loaded.bytes, b"%PDF-1.4");
    }
}
